//! Command script parser.
//!
//! A script is a list of labelled blocks. Each line in a block sends (`S`),
//! waits for (`R`) or extracts from (`E`) a frame, and is a list of tokens
//! separated by spaces or semicolons up to `$END`:
//!
//! ```text
//! :login
//! S 7E 14 00 6A $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 ... $PASSWORD $CRC 7E $END;
//! R 7E 14 00 6A $ADDR 00 00 00 00 00 00 01 00 $END;
//! E $LOGIN $END;
//! ```

use crate::codec::hex_pair_to_byte;
use crate::error::{Result, SmaError};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    End,
    Addr,
    Time,
    Serial,
    Crc,
    Pow,
    Dtot,
    Add2,
    Chan,
    ITime,
    TmMinus,
    TmPlus,
    TimeString,
    TimeFrom1,
    TimeTo1,
    TimeFrom2,
    TimeTo2,
    TestData,
    ArchiveData1,
    Password,
    Signal,
    SusyId,
    InvCode,
    ArchCode,
    InverterData,
    Cnt,
    TimeZone,
    TimeSet,
    Data,
    MySusyId,
    MySerial,
    Login,
}

impl Placeholder {
    pub const ALL: [Placeholder; 32] = [
        Placeholder::End,
        Placeholder::Addr,
        Placeholder::Time,
        Placeholder::Serial,
        Placeholder::Crc,
        Placeholder::Pow,
        Placeholder::Dtot,
        Placeholder::Add2,
        Placeholder::Chan,
        Placeholder::ITime,
        Placeholder::TmMinus,
        Placeholder::TmPlus,
        Placeholder::TimeString,
        Placeholder::TimeFrom1,
        Placeholder::TimeTo1,
        Placeholder::TimeFrom2,
        Placeholder::TimeTo2,
        Placeholder::TestData,
        Placeholder::ArchiveData1,
        Placeholder::Password,
        Placeholder::Signal,
        Placeholder::SusyId,
        Placeholder::InvCode,
        Placeholder::ArchCode,
        Placeholder::InverterData,
        Placeholder::Cnt,
        Placeholder::TimeZone,
        Placeholder::TimeSet,
        Placeholder::Data,
        Placeholder::MySusyId,
        Placeholder::MySerial,
        Placeholder::Login,
    ];

    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Placeholder::End => "$END",
            Placeholder::Addr => "$ADDR",
            Placeholder::Time => "$TIME",
            Placeholder::Serial => "$SERIAL",
            Placeholder::Crc => "$CRC",
            Placeholder::Pow => "$POW",
            Placeholder::Dtot => "$DTOT",
            Placeholder::Add2 => "$ADD2",
            Placeholder::Chan => "$CHAN",
            Placeholder::ITime => "$ITIME",
            Placeholder::TmMinus => "$TMMI",
            Placeholder::TmPlus => "$TMPL",
            Placeholder::TimeString => "$TIMESTRING",
            Placeholder::TimeFrom1 => "$TIMEFROM1",
            Placeholder::TimeTo1 => "$TIMETO1",
            Placeholder::TimeFrom2 => "$TIMEFROM2",
            Placeholder::TimeTo2 => "$TIMETO2",
            Placeholder::TestData => "$TESTDATA",
            Placeholder::ArchiveData1 => "$ARCHIVEDATA1",
            Placeholder::Password => "$PASSWORD",
            Placeholder::Signal => "$SIGNAL",
            Placeholder::SusyId => "$SUSYID",
            Placeholder::InvCode => "$INVCODE",
            Placeholder::ArchCode => "$ARCHCODE",
            Placeholder::InverterData => "$INVERTERDATA",
            Placeholder::Cnt => "$CNT",
            Placeholder::TimeZone => "$TIMEZONE",
            Placeholder::TimeSet => "$TIMESET",
            Placeholder::Data => "$DATA",
            Placeholder::MySusyId => "$MYSUSYID",
            Placeholder::MySerial => "$MYSERIAL",
            Placeholder::Login => "$LOGIN",
        }
    }

    pub fn from_token(token: &str) -> Option<Placeholder> {
        Self::ALL.into_iter().find(|p| p.token() == token)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(u8),
    Placeholder(Placeholder),
    /// Neither a placeholder nor a hex pair. Sent as whatever byte the lenient
    /// hex parser makes of it.
    Unrecognized { text: String, byte: u8 },
}

impl Token {
    fn parse(word: &str, line: usize) -> Token {
        if let Some(p) = Placeholder::from_token(word) {
            return Token::Placeholder(p);
        }
        if word.len() == 2 && word.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Token::Literal(hex_pair_to_byte(word));
        }
        let byte = hex_pair_to_byte(word);
        tracing::warn!(
            "Line {}: unrecognized token '{}', treating as byte {:02x}",
            line,
            word,
            byte
        );
        Token::Unrecognized {
            text: word.to_string(),
            byte,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Receive,
    Send,
    Extract,
}

impl CommandKind {
    pub fn from_word(word: &str) -> Option<CommandKind> {
        match word {
            "R" => Some(CommandKind::Receive),
            "S" => Some(CommandKind::Send),
            "E" => Some(CommandKind::Extract),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Receive => write!(f, "receive"),
            CommandKind::Send => write!(f, "send"),
            CommandKind::Extract => write!(f, "extract"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// 1-based line number in the script file.
    pub line: usize,
    pub kind: CommandKind,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub line: usize,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    blocks: Vec<Block>,
}

impl Script {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut blocks: Vec<Block> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let mut words = raw
                .split(|c: char| c == ';' || c.is_whitespace())
                .filter(|w| !w.is_empty());
            let Some(first) = words.next() else {
                continue;
            };
            if first.starts_with('#') {
                continue;
            }
            if let Some(name) = first.strip_prefix(':') {
                blocks.push(Block {
                    name: name.to_string(),
                    line,
                    commands: Vec::new(),
                });
                continue;
            }
            let Some(kind) = CommandKind::from_word(first) else {
                continue;
            };
            let Some(block) = blocks.last_mut() else {
                return Err(SmaError::Script {
                    line,
                    message: "command before the first block label".to_string(),
                });
            };

            let mut tokens = Vec::new();
            let mut ended = false;
            for word in words {
                if word == Placeholder::End.token() {
                    ended = true;
                    break;
                }
                tokens.push(Token::parse(word, line));
            }
            if !ended {
                return Err(SmaError::Script {
                    line,
                    message: format!("missing {}", Placeholder::End),
                });
            }
            block.commands.push(Command { line, kind, tokens });
        }

        Ok(Self { blocks })
    }

    /// First block with the given name.
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}
