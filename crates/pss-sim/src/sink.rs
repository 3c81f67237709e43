//! Logging sinks (out-of-scope collaborators; only their interfaces are
//! specified). A line-oriented text sink and a tab-separated CSV sink.

use std::io::Write;

use crate::error::SinkError;

/// Free-form, append-only text sink. One record per logged event.
pub trait LineSink {
    fn write_line(&mut self, line: &str) -> Result<(), SinkError>;
}

/// Writes lines to stdout. The default console sink.
#[derive(Default)]
pub struct StdoutLineSink;

impl LineSink for StdoutLineSink {
    fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        println!("{line}");
        Ok(())
    }
}

/// Tab-separated, LF-terminated CSV sink for the frequency oracle's power
/// trace.
///
/// Header, emitted once: `# SimTime_ms\tSimTime_s\tRelativeTime_s\t
/// FreqDeviation_Hz\tTotalVppPower_kW`. Each record is formatted
/// `%.0f\t%.3f\t%.3f\t%.5f\t%.2f`.
pub trait CsvSink {
    fn write_header(&mut self) -> Result<(), SinkError>;

    fn write_record(
        &mut self,
        sim_time_ms: u64,
        sim_time_s: f64,
        relative_time_s: f64,
        freq_deviation_hz: f64,
        total_vpp_power_kw: f64,
    ) -> Result<(), SinkError>;
}

/// A [`CsvSink`] that writes through any `std::io::Write`, e.g. a file or
/// `Vec<u8>` for tests.
pub struct WriterCsvSink<W> {
    writer: W,
}

impl<W: Write> WriterCsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> CsvSink for WriterCsvSink<W> {
    fn write_header(&mut self) -> Result<(), SinkError> {
        writeln!(
            self.writer,
            "# SimTime_ms\tSimTime_s\tRelativeTime_s\tFreqDeviation_Hz\tTotalVppPower_kW"
        )?;
        Ok(())
    }

    fn write_record(
        &mut self,
        sim_time_ms: u64,
        sim_time_s: f64,
        relative_time_s: f64,
        freq_deviation_hz: f64,
        total_vpp_power_kw: f64,
    ) -> Result<(), SinkError> {
        writeln!(
            self.writer,
            "{:.0}\t{:.3}\t{:.3}\t{:.5}\t{:.2}",
            sim_time_ms as f64, sim_time_s, relative_time_s, freq_deviation_hz, total_vpp_power_kw
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_sink_formats_header_and_records_per_spec() {
        let mut buf = Vec::new();
        {
            let mut sink = WriterCsvSink::new(&mut buf);
            sink.write_header().unwrap();
            sink.write_record(6000, 6.0, 1.0, -0.02345, 113.3).unwrap();
        }

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "# SimTime_ms\tSimTime_s\tRelativeTime_s\tFreqDeviation_Hz\tTotalVppPower_kW"
        );
        assert_eq!(lines.next().unwrap(), "6000\t6.000\t1.000\t-0.02345\t113.30");
    }
}
