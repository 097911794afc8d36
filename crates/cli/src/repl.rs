//! Interactive shell over any [`Db`] implementation. Reads whitespace-
//! separated commands from `input`, writes results to `output`, and keeps
//! the session alive through command errors.

use std::io::{self, BufRead, Write};

use crate::engine::Db;

pub struct Repl<D, R, W> {
    db: D,
    input: R,
    output: W,
}

impl<D: Db, R: BufRead, W: Write> Repl<D, R, W> {
    pub fn new(db: D, input: R, output: W) -> Self {
        Self { db, input, output }
    }

    /// Runs the prompt loop until `exit` or end of input.
    pub fn run(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;

            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output, "Bye!")?;
                return Ok(());
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.split_first() {
                None => writeln!(self.output, "Empty command")?,
                Some((&"get", args)) => {
                    if args.len() != 1 {
                        writeln!(self.output, "Expected 1 arguments, received: {}", args.len())?;
                        continue;
                    }
                    match self.db.get(args[0].as_bytes()) {
                        Ok(value) => {
                            writeln!(self.output, "{}", String::from_utf8_lossy(&value))?
                        }
                        Err(e) => writeln!(self.output, "{}", e)?,
                    }
                }
                Some((&"set", args)) => {
                    if args.len() != 2 {
                        writeln!(self.output, "Expected 2 arguments, received: {}", args.len())?;
                        continue;
                    }
                    // No output on success.
                    if let Err(e) = self.db.set(args[0].as_bytes(), args[1].as_bytes()) {
                        writeln!(self.output, "{}", e)?;
                    }
                }
                Some((&"del", args)) => {
                    if args.len() != 1 {
                        writeln!(self.output, "Expected 1 arguments, received: {}", args.len())?;
                        continue;
                    }
                    match self.db.del(args[0].as_bytes()) {
                        Ok(previous) => {
                            writeln!(self.output, "{}", String::from_utf8_lossy(&previous))?
                        }
                        Err(e) => writeln!(self.output, "{}", e)?,
                    }
                }
                Some((&"exit", _)) => {
                    writeln!(self.output, "Bye!")?;
                    return Ok(());
                }
                Some(_) => writeln!(self.output, "Unkown command")?,
            }
        }
    }
}
