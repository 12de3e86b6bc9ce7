//! Text control messages.
//!
//! Each message is one text frame: a command word followed by space separated
//! fields. `move` frames may carry several newline separated lines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::grid::PieceId;
use crate::puzzle_id::{PuzzleId, PuzzleIdError};

pub const RANDOM_FEATURED_COMMAND: &str = "randomFeaturedWikimedia";
pub const PICTURE_OF_THE_DAY_COMMAND: &str = "wikimediaPotd";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{command}: missing {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{field}: '{value}' is not a valid number")]
    BadNumber { field: &'static str, value: String },
    #[error("image url is empty")]
    EmptyImage,
    #[error(transparent)]
    PuzzleId(#[from] PuzzleIdError),
}

/// Image to cut the puzzle from: `url[;link]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub link: Option<String>,
}

impl ImageRef {
    pub fn new(url: impl Into<String>, link: Option<String>) -> Self {
        Self {
            url: url.into(),
            link,
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let (url, link) = match value.split_once(';') {
            Some((url, link)) => (url, Some(link)),
            None => (value, None),
        };
        if url.is_empty() {
            return Err(ParseError::EmptyImage);
        }
        Ok(Self {
            url: url.to_string(),
            link: link.filter(|link| !link.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            Some(link) => write!(f, "{};{}", self.url, link),
            None => f.write_str(&self.url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PieceMove {
    pub piece: PieceId,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientText {
    New {
        cols: u8,
        rows: u8,
        image: ImageRef,
        seed: Option<u32>,
    },
    Join(PuzzleId),
    Connect {
        a: PieceId,
        b: PieceId,
    },
    Move(Vec<PieceMove>),
    Poll,
    RandomFeatured,
    PictureOfTheDay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerText {
    Id(PuzzleId),
    Ack(Option<u32>),
    Error(String),
    UseImage(ImageRef),
}

fn field<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    name: &'static str,
) -> Result<&'a str, ParseError> {
    parts
        .next()
        .ok_or(ParseError::MissingField {
            command,
            field: name,
        })
}

fn number<T: FromStr>(value: &str, name: &'static str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::BadNumber {
        field: name,
        value: value.to_string(),
    })
}

fn parse_move_line(line: &str) -> Result<PieceMove, ParseError> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("move") => {}
        Some(other) => return Err(ParseError::UnknownCommand(other.to_string())),
        None => return Err(ParseError::Empty),
    }
    Ok(PieceMove {
        piece: number(field(&mut parts, "move", "piece")?, "piece")?,
        x: number(field(&mut parts, "move", "x")?, "x")?,
        y: number(field(&mut parts, "move", "y")?, "y")?,
    })
}

impl FromStr for ClientText {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.split_whitespace();
        let command = parts.next().ok_or(ParseError::Empty)?;
        match command {
            "new" => {
                let cols = number(field(&mut parts, "new", "width")?, "width")?;
                let rows = number(field(&mut parts, "new", "height")?, "height")?;
                let image = ImageRef::parse(field(&mut parts, "new", "image")?)?;
                let seed = parts.next().map(|raw| number(raw, "seed")).transpose()?;
                Ok(ClientText::New {
                    cols,
                    rows,
                    image,
                    seed,
                })
            }
            "join" => Ok(ClientText::Join(PuzzleId::parse(field(
                &mut parts, "join", "puzzle id",
            )?)?)),
            "connect" => Ok(ClientText::Connect {
                a: number(field(&mut parts, "connect", "piece a")?, "piece a")?,
                b: number(field(&mut parts, "connect", "piece b")?, "piece b")?,
            }),
            "move" => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(parse_move_line)
                .collect::<Result<Vec<_>, _>>()
                .map(ClientText::Move),
            "poll" => Ok(ClientText::Poll),
            RANDOM_FEATURED_COMMAND => Ok(ClientText::RandomFeatured),
            PICTURE_OF_THE_DAY_COMMAND => Ok(ClientText::PictureOfTheDay),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for ClientText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientText::New {
                cols,
                rows,
                image,
                seed,
            } => {
                write!(f, "new {cols} {rows} {image}")?;
                if let Some(seed) = seed {
                    write!(f, " {seed}")?;
                }
                Ok(())
            }
            ClientText::Join(id) => write!(f, "join {id}"),
            ClientText::Connect { a, b } => write!(f, "connect {a} {b}"),
            ClientText::Move(moves) => {
                for (i, step) in moves.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "move {} {} {}", step.piece, step.x, step.y)?;
                }
                Ok(())
            }
            ClientText::Poll => f.write_str("poll"),
            ClientText::RandomFeatured => f.write_str(RANDOM_FEATURED_COMMAND),
            ClientText::PictureOfTheDay => f.write_str(PICTURE_OF_THE_DAY_COMMAND),
        }
    }
}

impl FromStr for ServerText {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = text.strip_prefix("id:") {
            return Ok(ServerText::Id(PuzzleId::parse(rest.trim())?));
        }
        if let Some(rest) = text.strip_prefix("error") {
            if rest.is_empty() || rest.starts_with(' ') {
                return Ok(ServerText::Error(rest.trim_start().to_string()));
            }
        }
        let mut parts = text.split_whitespace();
        match parts.next().ok_or(ParseError::Empty)? {
            "ack" => Ok(ServerText::Ack(
                parts.next().map(|raw| number(raw, "token")).transpose()?,
            )),
            "useImage" => {
                let url = field(&mut parts, "useImage", "url")?;
                Ok(ServerText::UseImage(ImageRef::new(
                    url,
                    parts.next().map(str::to_string),
                )))
            }
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for ServerText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerText::Id(id) => write!(f, "id: {id}"),
            ServerText::Ack(Some(token)) => write!(f, "ack {token}"),
            ServerText::Ack(None) => f.write_str("ack"),
            ServerText::Error(message) => write!(f, "error {message}"),
            ServerText::UseImage(image) => match &image.link {
                Some(link) => write!(f, "useImage {} {}", image.url, link),
                None => write!(f, "useImage {}", image.url),
            },
        }
    }
}
