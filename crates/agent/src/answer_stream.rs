//! Incremental extraction of the `answer` field from a streaming decision.
//!
//! Tokens arrive split at arbitrary points, so the extractor is a small
//! state machine fed one character at a time. It only reacts to the
//! top-level `"answer"` key; the same word appearing as a value or inside
//! a nested object is ignored.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside any string, tracking nesting and key position.
    SeekingKey,
    /// Inside a string that is not the answer value.
    InKey { escaped: bool },
    /// Saw the `"answer"` key, waiting for `:`.
    AfterKey,
    /// Saw `:`, waiting for the opening quote.
    AwaitValue,
    InValue,
    Escaped,
    Unicode,
    Done,
}

#[derive(Debug, Clone)]
pub struct AnswerExtractor {
    state: State,
    depth: usize,
    expect_key: bool,
    candidate: bool,
    key: String,
    hex: String,
    high_surrogate: Option<u32>,
    started: bool,
    answer: String,
}

impl Default for AnswerExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerExtractor {
    pub fn new() -> Self {
        Self {
            state: State::SeekingKey,
            depth: 0,
            expect_key: false,
            candidate: false,
            key: String::new(),
            hex: String::new(),
            high_surrogate: None,
            started: false,
            answer: String::new(),
        }
    }

    /// Feeds one chunk and returns the decoded answer text it completed.
    pub fn feed(&mut self, chunk: &str) -> String {
        let mut out = String::new();
        for ch in chunk.chars() {
            self.step(ch, &mut out);
        }
        self.answer.push_str(&out);
        out
    }

    /// The answer value has begun.
    pub fn started(&self) -> bool {
        self.started
    }

    /// The closing quote of the answer value has been seen.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Everything decoded so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    fn step(&mut self, ch: char, out: &mut String) {
        match self.state {
            State::SeekingKey => self.structural(ch),
            State::InKey { escaped: true } => {
                self.key.push(ch);
                self.state = State::InKey { escaped: false };
            }
            State::InKey { escaped: false } => match ch {
                '\\' => self.state = State::InKey { escaped: true },
                '"' => {
                    self.state = if self.candidate && self.key == "answer" {
                        State::AfterKey
                    } else {
                        State::SeekingKey
                    };
                }
                _ => self.key.push(ch),
            },
            State::AfterKey => match ch {
                ':' => {
                    self.expect_key = false;
                    self.state = State::AwaitValue;
                }
                c if c.is_whitespace() => {}
                c => {
                    self.state = State::SeekingKey;
                    self.structural(c);
                }
            },
            State::AwaitValue => match ch {
                '"' => {
                    self.started = true;
                    self.state = State::InValue;
                }
                c if c.is_whitespace() => {}
                // not a string value; keep scanning
                c => {
                    self.state = State::SeekingKey;
                    self.structural(c);
                }
            },
            State::InValue => match ch {
                '\\' => self.state = State::Escaped,
                '"' => {
                    self.flush_surrogate(out);
                    self.state = State::Done;
                }
                c => {
                    self.flush_surrogate(out);
                    out.push(c);
                }
            },
            State::Escaped => {
                self.state = State::InValue;
                let decoded = match ch {
                    'u' => {
                        self.hex.clear();
                        self.state = State::Unicode;
                        return;
                    }
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    other => other,
                };
                self.flush_surrogate(out);
                out.push(decoded);
            }
            State::Unicode => {
                self.hex.push(ch);
                if self.hex.len() < 4 {
                    return;
                }
                self.state = State::InValue;
                let Ok(unit) = u32::from_str_radix(&self.hex, 16) else {
                    self.flush_surrogate(out);
                    out.push(char::REPLACEMENT_CHARACTER);
                    return;
                };
                self.push_code_unit(unit, out);
            }
            State::Done => {}
        }
    }

    /// Tracks nesting outside strings so only top-level keys qualify.
    fn structural(&mut self, ch: char) {
        match ch {
            '{' | '[' => {
                self.depth += 1;
                self.expect_key = self.depth == 1 && ch == '{';
            }
            '}' | ']' => {
                self.depth = self.depth.saturating_sub(1);
                self.expect_key = false;
            }
            ',' => self.expect_key = self.depth == 1,
            ':' => self.expect_key = false,
            '"' => {
                self.candidate = self.depth == 1 && self.expect_key;
                self.key.clear();
                self.state = State::InKey { escaped: false };
            }
            _ => {}
        }
    }

    fn push_code_unit(&mut self, unit: u32, out: &mut String) {
        if (0xD800..0xDC00).contains(&unit) {
            self.flush_surrogate(out);
            self.high_surrogate = Some(unit);
            return;
        }
        if (0xDC00..0xE000).contains(&unit) {
            let decoded = self
                .high_surrogate
                .take()
                .and_then(|high| char::from_u32(0x10000 + ((high - 0xD800) << 10) + (unit - 0xDC00)));
            out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
            return;
        }
        self.flush_surrogate(out);
        out.push(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    /// A lone high surrogate becomes a replacement character.
    fn flush_surrogate(&mut self, out: &mut String) {
        if self.high_surrogate.take().is_some() {
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}
