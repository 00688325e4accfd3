//! I/O channels consumed by `Io` micros.
//!
//! A channel is any [`IoChannel`] attached to a machine under a name. The run
//! loop calls into channels synchronously from the execution thread and
//! flushes every channel when a run ends.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Channels attached to a machine, keyed by name.
pub type Channels = BTreeMap<String, Box<dyn IoChannel>>;

/// Failure reading from or writing to a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No more input is available.
    #[error("end of input")]
    EndOfInput,
    /// The next input token is not a decimal integer.
    #[error("`{0}` is not an integer")]
    NotAnInteger(String),
    /// Shared output buffer became unusable.
    #[error("output buffer is poisoned")]
    Poisoned,
    /// Underlying stream failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A source and sink of integers and characters.
pub trait IoChannel: Send {
    /// Reads the next whitespace-delimited decimal integer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] at end of input or on malformed input.
    fn read_integer(&mut self) -> Result<i64, ChannelError>;

    /// Reads the next character.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] at end of input.
    fn read_char(&mut self) -> Result<char, ChannelError>;

    /// Writes an integer followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the sink fails.
    fn write_integer(&mut self, value: i64) -> Result<(), ChannelError>;

    /// Writes one character.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the sink fails.
    fn write_char(&mut self, value: char) -> Result<(), ChannelError>;

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the sink fails.
    fn flush(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

fn next_token(
    pending: &mut VecDeque<char>,
    mut refill: impl FnMut(&mut VecDeque<char>) -> Result<bool, ChannelError>,
) -> Result<String, ChannelError> {
    loop {
        while pending.front().is_some_and(|c| c.is_whitespace()) {
            pending.pop_front();
        }
        if !pending.is_empty() {
            break;
        }
        if !refill(pending)? {
            return Err(ChannelError::EndOfInput);
        }
    }
    let mut token = String::new();
    while let Some(c) = pending.front().copied() {
        if c.is_whitespace() {
            break;
        }
        token.push(c);
        pending.pop_front();
    }
    Ok(token)
}

fn parse_integer(token: String) -> Result<i64, ChannelError> {
    token
        .parse()
        .map_err(|_| ChannelError::NotAnInteger(token))
}

/// Shared text written by a [`BufferChannel`].
pub type SharedOutput = Arc<Mutex<String>>;

/// An in-memory channel with scripted input and a shared output buffer.
#[derive(Debug, Default)]
pub struct BufferChannel {
    input: VecDeque<char>,
    output: SharedOutput,
}

impl BufferChannel {
    /// Creates a channel whose reads consume `input`.
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            output: SharedOutput::default(),
        }
    }

    /// Handle to everything written so far.
    #[must_use]
    pub fn output(&self) -> SharedOutput {
        Arc::clone(&self.output)
    }

    fn push(&self, text: &str) -> Result<(), ChannelError> {
        self.output
            .lock()
            .map_err(|_| ChannelError::Poisoned)?
            .push_str(text);
        Ok(())
    }
}

impl IoChannel for BufferChannel {
    fn read_integer(&mut self) -> Result<i64, ChannelError> {
        parse_integer(next_token(&mut self.input, |_| Ok(false))?)
    }

    fn read_char(&mut self) -> Result<char, ChannelError> {
        self.input.pop_front().ok_or(ChannelError::EndOfInput)
    }

    fn write_integer(&mut self, value: i64) -> Result<(), ChannelError> {
        self.push(&format!("{value}\n"))
    }

    fn write_char(&mut self, value: char) -> Result<(), ChannelError> {
        self.push(value.encode_utf8(&mut [0; 4]))
    }
}

/// A channel over a buffered reader and a writer, e.g. the console or files.
pub struct StreamChannel<R, W> {
    reader: R,
    writer: W,
    pending: VecDeque<char>,
}

impl StreamChannel<BufReader<Stdin>, Stdout> {
    /// Channel over standard input and standard output.
    #[must_use]
    pub fn console() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> StreamChannel<R, W> {
    /// Wraps a reader and a writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: VecDeque::new(),
        }
    }

    /// Returns the writer, dropping any unread input.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn fill(&mut self) -> Result<bool, ChannelError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        self.pending.extend(line.chars());
        Ok(true)
    }
}

impl<R: BufRead + Send, W: Write + Send> IoChannel for StreamChannel<R, W> {
    fn read_integer(&mut self) -> Result<i64, ChannelError> {
        let reader = &mut self.reader;
        let token = next_token(&mut self.pending, |pending| {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            pending.extend(line.chars());
            Ok(true)
        })?;
        parse_integer(token)
    }

    fn read_char(&mut self) -> Result<char, ChannelError> {
        if self.pending.is_empty() && !self.fill()? {
            return Err(ChannelError::EndOfInput);
        }
        self.pending.pop_front().ok_or(ChannelError::EndOfInput)
    }

    fn write_integer(&mut self, value: i64) -> Result<(), ChannelError> {
        writeln!(self.writer, "{value}")?;
        Ok(())
    }

    fn write_char(&mut self, value: char) -> Result<(), ChannelError> {
        write!(self.writer, "{value}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.writer.flush()?;
        Ok(())
    }
}
