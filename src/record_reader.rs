use std::io::BufRead;
use crate::error::FatalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State { Bare, Boundary, QuoteEntering, Quoted, QuoteExiting }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Input { Separator, Quote, Newline, Other(char), End }

impl Input {
    fn as_char(self) -> Option<char> {
        match self {
            Input::Separator => Some(','),
            Input::Quote => Some('"'),
            Input::Newline => Some('\n'),
            Input::Other(c) => Some(c),
            Input::End => None,
        }
    }
}

enum Step { Next(State), EndRow, Unterminated }

fn transition(state: State, input: Input) -> Step {
    use State::*;
    match (state, input) {
        (Bare | Boundary, Input::Separator) => Step::Next(Boundary),
        (Bare | Boundary, Input::Quote) => Step::Next(QuoteEntering),
        (Bare | Boundary, Input::Newline | Input::End) => Step::EndRow,
        (Bare | Boundary, Input::Other(_)) => Step::Next(Bare),
        (QuoteEntering | Quoted, Input::Quote) => Step::Next(QuoteExiting),
        (QuoteEntering | Quoted, Input::End) => Step::Unterminated,
        (QuoteEntering | Quoted, _) => Step::Next(Quoted),
        (QuoteExiting, Input::Separator) => Step::Next(Boundary),
        (QuoteExiting, Input::Quote) => Step::Next(Quoted),
        (QuoteExiting, Input::Newline | Input::End) => Step::EndRow,
        (QuoteExiting, Input::Other(_)) => Step::Next(Bare),
    }
}

/// Comma separated row reader. Pulls one physical line at a time from `input`
/// and hands out logical rows, which may span several lines inside quotes.
pub struct RecordReader<R> {
    input: R,
    line: Vec<char>,
    pos: usize,
    eof: bool,
    started: bool,
    row: usize,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, line: Vec::new(), pos: 0, eof: false, started: false, row: 0 }
    }

    /// Number of rows started so far; the current row while inside `read_row`.
    pub fn row_number(&self) -> usize { self.row }

    fn fill(&mut self) -> Result<(), FatalError> {
        while self.pos >= self.line.len() && !self.eof {
            let mut s = String::new();
            let n = self.input.read_line(&mut s).map_err(|source| FatalError::MasterRead { row: self.row, source })?;
            if n == 0 { self.eof = true; }
            if !self.started {
                self.started = true;
                if s.starts_with('\u{feff}') { s.remove(0); }
            }
            self.line = s.chars().collect();
            self.pos = 0;
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<char>, FatalError> {
        self.fill()?;
        Ok(self.line.get(self.pos).copied())
    }

    fn next_input(&mut self) -> Result<Input, FatalError> {
        let Some(c) = self.peek()? else { return Ok(Input::End) };
        self.pos += 1;
        Ok(match c {
            ',' => Input::Separator,
            '"' => Input::Quote,
            '\n' => Input::Newline,
            '\r' => {
                if self.peek()? == Some('\n') { self.pos += 1; Input::Newline } else { Input::Other('\r') }
            }
            c => Input::Other(c),
        })
    }

    /// Next row's fields in column order, `None` once the stream is exhausted.
    pub fn read_row(&mut self) -> Result<Option<Vec<String>>, FatalError> {
        if self.peek()?.is_none() { return Ok(None); }
        self.row += 1;
        let mut fields = Vec::new();
        let mut cell = String::new();
        let mut state = State::Bare;
        loop {
            let input = self.next_input()?;
            match transition(state, input) {
                Step::Unterminated => return Err(FatalError::UnterminatedQuote { row: self.row }),
                Step::EndRow => {
                    fields.push(cell);
                    return Ok(Some(fields));
                }
                Step::Next(next) => {
                    match next {
                        State::Bare | State::Quoted => if let Some(c) = input.as_char() { cell.push(c) },
                        State::Boundary => fields.push(std::mem::take(&mut cell)),
                        State::QuoteEntering | State::QuoteExiting => {}
                    }
                    state = next;
                }
            }
        }
    }
}
