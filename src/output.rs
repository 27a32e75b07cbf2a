use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn to_writer(self) -> Result<Writer, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<dyn std::io::Write>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let sink = match self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Sink::Table(table)
            }
            Format::Jsonl => Sink::Jsonl,
            Format::Csv => Sink::Csv,
        };
        Ok(Writer { args: self, io, sink })
    }
}

/// Streams records to the terminal or a file as a table, JSON lines or CSV.
///
/// Table output buffers everything until [`Writer::finish`]; the line
/// oriented formats hit the underlying writer row by row, which is what the
/// continuous poll mode relies on.
pub struct Writer {
    args: Args,
    io: Box<dyn std::io::Write>,
    sink: Sink,
}

enum Sink {
    Table(comfy_table::Table),
    Jsonl,
    Csv,
}

impl Writer {
    pub fn headers(&mut self, headers: &[&'static str]) -> Result<(), Error> {
        match &mut self.sink {
            Sink::Table(table) => {
                table.set_header(headers.to_vec());
                Ok(())
            }
            Sink::Csv => self.csv_row(headers.iter().map(|h| *h)),
            Sink::Jsonl => Ok(()),
        }
    }

    pub fn record<R: serde::Serialize>(
        &mut self,
        cells: impl FnOnce() -> Vec<String>,
        json: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.sink {
            Sink::Table(table) => {
                table.add_row(cells());
                Ok(())
            }
            Sink::Csv => {
                let cells = cells();
                self.csv_row(cells.iter().map(|c| c.as_str()))
            }
            Sink::Jsonl => {
                serde_json::to_writer(&mut self.io, &json()).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?;
                self.io.flush().map_err(|e| self.write_error(e))
            }
        }
    }

    fn csv_row<'v>(&mut self, cells: impl Iterator<Item = &'v str>) -> Result<(), Error> {
        let mut writer = csv_core::Writer::new();
        let mut buffer = [0u8; 1024];
        for (index, cell) in cells.enumerate() {
            if index != 0 {
                let (_, written) = writer.delimiter(&mut buffer);
                self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))?;
            }
            let mut field = cell.as_bytes();
            loop {
                let (result, read, written) = writer.field(field, &mut buffer);
                self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))?;
                field = &field[read..];
                if let WriteResult::InputEmpty = result {
                    break;
                }
            }
        }
        let (_, written) = writer.terminator(&mut buffer);
        self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))?;
        self.io.flush().map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(path) => Error::WriteFile(e, path.clone()),
        }
    }

    pub fn finish(mut self) -> Result<(), Error> {
        if let Sink::Table(table) = &self.sink {
            writeln!(self.io, "{table}").map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
