use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod codec;

pub const HEADER_LENGTH: usize = 10;
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const CHAT_HISTORY_LIMIT: usize = 50;
/// Longest chat line kept in a log, in characters.
pub const MAX_CHAT_LINE_CHARS: usize = 500;

pub const BOARD_SIZE: usize = 25;
pub const RED_CARDS: usize = 8;
pub const BLUE_CARDS: usize = 8;
pub const INNOCENT_CARDS: usize = 7;
pub const ASSASSIN_CARDS: usize = 2;
pub const MAX_CLUE_NUMBER: i64 = 9;

pub const HEARTBEAT_TOKEN: &[u8] = b"PRIMARY_HEARTBEAT";

pub const WORD_POOL: &[&str] = &[
    "APPLE", "BAKER", "CLOUD", "DREAM", "EAGLE", "FENCE", "GLOVE", "HOUSE", "INDIA", "JUMBO",
    "KNIFE", "LAUNCH", "MISSION", "NEPTUNE", "ORBIT", "PULSE", "QUEEN", "ROBOT", "SATELLITE",
    "TIGER", "UMBRELLA", "VENUS", "VOYAGER", "ZORRO", "ZEBRA", "SPIDER", "MERCURY", "DESK",
    "DOG", "CAT", "STRAW", "GRAPE", "CAR", "PLANE", "DRIVE", "BIRD", "FISH", "CRANE", "BLOCK",
    "BOARD", "GAME", "PLAY", "RUN", "JUMP", "DANCE", "SING", "ART", "BOOK", "READ",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Team::Red),
            "blue" => Ok(Team::Blue),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Spymaster,
    Operative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardColor {
    Red,
    Blue,
    Innocent,
    Assassin,
}

impl From<Team> for CardColor {
    fn from(team: Team) -> Self {
        match team {
            Team::Red => CardColor::Red,
            Team::Blue => CardColor::Blue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Red,
    Blue,
    Draw,
}

impl From<Team> for Winner {
    fn from(team: Team) -> Self {
        match team {
            Team::Red => Winner::Red,
            Team::Blue => Winner::Blue,
        }
    }
}

/// A board card as one particular viewer is allowed to see it.
///
/// `color` is omitted from the JSON entirely when the viewer may not know it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardView {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<CardColor>,
    pub revealed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub players: usize,
    pub game_in_progress: bool,
    pub owner: String,
    pub owner_fileno: u32,
}

/// Per-recipient snapshot of a room's game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateView {
    pub board: Vec<CardView>,
    pub red_score: u8,
    pub blue_score: u8,
    pub turn: Team,
    pub clue_word: String,
    pub clue_number: u8,
    pub guesses_made: u8,
    pub game_over: bool,
    pub winner: Option<Winner>,
    pub is_spymaster: bool,
    pub spymaster_red: Option<u32>,
    pub spymaster_blue: Option<u32>,
    pub operative_red: Vec<u32>,
    pub operative_blue: Vec<u32>,
    pub my_team: Option<Team>,
    pub my_role: Option<Role>,
}

/// Requests a peer may send. Unknown `type` values land in `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        name: String,
    },
    Chat {
        text: String,
    },
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    SetTeam {
        team: String,
    },
    StartGameRequest,
    Clue {
        word: String,
        number: i64,
    },
    Guess {
        word: String,
    },
    EndTurn,
    RefreshLobby,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Interprets an already-parsed JSON body.
    ///
    /// Fails when a known `type` is missing a field or carries one of the wrong shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom => "leave_room",
            ClientMessage::SetTeam { .. } => "set_team",
            ClientMessage::StartGameRequest => "start_game_request",
            ClientMessage::Clue { .. } => "clue",
            ClientMessage::Guess { .. } => "guess",
            ClientMessage::EndTurn => "end_turn",
            ClientMessage::RefreshLobby => "refresh_lobby",
            ClientMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LobbyUpdate {
        players: Vec<String>,
        rooms: Vec<RoomSummary>,
        chat: Vec<String>,
    },
    RoomCreated {
        room_id: String,
        name: String,
        owner_fileno: u32,
    },
    RoomJoined {
        room_id: String,
        owner_fileno: u32,
    },
    RoomLeft,
    TeamSetAck {
        team: Team,
    },
    GameStartAck {
        message: String,
    },
    GameStateUpdate(GameStateView),
    Error {
        message: String,
    },
    GuessFeedback {
        message: String,
        guess: Option<String>,
        clue: String,
        team: Option<Team>,
        turn: Option<Team>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
