use std::fmt::Write;

use jiff::Timestamp;
use log::{Level, Record};
use logforth::{
    append::Stdout,
    diagnostic::Diagnostic,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// One line per record: UTC timestamp, level, target and message.
#[derive(Debug, Clone, Copy)]
struct LineLayout {
    colored: bool,
}

impl LineLayout {
    fn line(&self, timestamp: Timestamp, record: &Record<'_>) -> Result<String, std::fmt::Error> {
        let mut line = String::new();
        let level = record.level();

        write!(line, "{} ", timestamp.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        if self.colored {
            write!(line, "\x1b[{}m{level:>5}\x1b[0m", ansi_color(level))?;
        } else {
            write!(line, "{level:>5}")?;
        }

        write!(line, "  {}: {}", record.target(), record.args())?;

        Ok(line)
    }
}

fn ansi_color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Debug => 34,
        Level::Trace => 35,
    }
}

impl Layout for LineLayout {
    fn format(&self, record: &Record<'_>, _diagnostics: &[Box<dyn Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        Ok(self.line(Timestamp::now(), record)?.into_bytes())
    }
}

pub(super) fn init(args: &Args) -> anyhow::Result<()> {
    let filter = args.log_level.env_filter()?;

    let layout = match args.log_style {
        LogStyle::Color => Some(LineLayout { colored: true }),
        LogStyle::Text => Some(LineLayout { colored: false }),
        LogStyle::Json => None,
    };

    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(filter);

            match layout {
                Some(layout) => d.append(Stdout::default().with_layout(layout)),
                None => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();

    Ok(())
}
