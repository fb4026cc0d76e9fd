use crate::game::{GameError, GameState, GuessOutcome, GuessResult};
use crate::registry::SessionId;
use log::info;
use rand::Rng;
use shared::{
    GameStateView, Role, RoomSummary, Team, Winner, CHAT_HISTORY_LIMIT, MAX_CHAT_LINE_CHARS,
};
use std::collections::{HashMap, VecDeque};

/// Chat history that only keeps the most recent entries.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    lines: VecDeque<String>,
}

impl ChatLog {
    /// Appends a line, cut to [`MAX_CHAT_LINE_CHARS`].
    pub fn push(&mut self, line: impl Into<String>) {
        let mut line = line.into();
        if let Some((cut, _)) = line.char_indices().nth(MAX_CHAT_LINE_CHARS) {
            line.truncate(cut);
        }
        self.lines.push_back(line);
        while self.lines.len() > CHAT_HISTORY_LIMIT {
            self.lines.pop_front();
        }
    }

    pub fn push_system(&mut self, line: impl AsRef<str>) {
        self.push(format!("[SYSTEM] {}", line.as_ref()));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A player's standing inside one room.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub chosen_team: Option<Team>,
    pub team: Option<Team>,
    pub role: Option<Role>,
}

impl Member {
    fn new(name: String) -> Self {
        Self {
            name,
            chosen_team: None,
            team: None,
            role: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Forming,
    InProgress,
    Concluded,
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub owner: SessionId,
    members: HashMap<SessionId, Member>,
    chat: ChatLog,
    game: Option<GameState>,
}

impl Room {
    pub fn new(id: String, name: String, owner: SessionId) -> Self {
        Self {
            id,
            name,
            owner,
            members: HashMap::new(),
            chat: ChatLog::default(),
            game: None,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        match &self.game {
            None => RoomPhase::Forming,
            Some(game) if game.game_over => RoomPhase::Concluded,
            Some(_) => RoomPhase::InProgress,
        }
    }

    pub fn game_in_progress(&self) -> bool {
        self.phase() == RoomPhase::InProgress
    }

    pub fn game(&self) -> Option<&GameState> {
        self.game.as_ref()
    }

    pub fn member(&self, id: SessionId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn member_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.members.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn add_chat_message(&mut self, line: impl Into<String>) {
        self.chat.push(line);
    }

    /// Adds a member with a clean team and role. Returns false if already present.
    pub fn add_member(&mut self, id: SessionId, name: &str) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        self.members.insert(id, Member::new(name.to_string()));
        self.chat.push(format!("{} joined the room.", name));
        info!("Session {} ({}) joined room {}", id, name, self.id);
        true
    }

    /// Removes a member. A spymaster leaving mid-game ends it as a draw.
    pub fn remove_member(&mut self, id: SessionId) -> Option<Member> {
        let member = self.members.remove(&id)?;
        self.chat.push(format!("{} left the room.", member.name));
        info!("Session {} ({}) left room {}", id, member.name, self.id);

        if let Some(game) = self.game.as_mut().filter(|g| !g.game_over) {
            if game.is_spymaster(id) {
                game.abandon();
                self.chat
                    .push_system("A spymaster left. Game ended prematurely.");
                info!("Room {}: game ended because a spymaster left", self.id);
            } else {
                game.forget_operative(id);
            }
        }
        Some(member)
    }

    pub fn rename_member(&mut self, id: SessionId, name: &str) -> bool {
        match self.members.get_mut(&id) {
            Some(member) => {
                member.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_chosen_team(&mut self, id: SessionId, team: Team) -> bool {
        match self.members.get_mut(&id) {
            Some(member) => {
                member.chosen_team = Some(team);
                true
            }
            None => false,
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            players: self.members.len(),
            game_in_progress: self.game_in_progress(),
            owner: self
                .members
                .get(&self.owner)
                .map(|m| m.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            owner_fileno: self.owner.get(),
        }
    }

    pub fn start_game(&mut self) -> Result<String, GameError> {
        self.start_game_with(&mut rand::thread_rng())
    }

    pub fn start_game_with<R: Rng>(&mut self, rng: &mut R) -> Result<String, GameError> {
        if self.members.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }
        if self.game_in_progress() {
            return Err(GameError::AlreadyInProgress);
        }

        let mut players: Vec<(SessionId, Option<Team>)> = self
            .members
            .iter()
            .map(|(id, member)| (*id, member.chosen_team))
            .collect();
        players.sort_by_key(|(id, _)| *id);

        let game = GameState::new(rng, &players);
        for (id, member) in self.members.iter_mut() {
            member.team = None;
            member.role = None;
            for team in [Team::Red, Team::Blue] {
                if game.spymaster(team) == Some(*id) {
                    member.team = Some(team);
                    member.role = Some(Role::Spymaster);
                } else if game.operatives(team).contains(id) {
                    member.team = Some(team);
                    member.role = Some(Role::Operative);
                }
            }
        }

        let red = self.spymaster_name(&game, Team::Red);
        let blue = self.spymaster_name(&game, Team::Blue);
        self.chat.push_system("A new game has started!");
        self.chat.push_system(format!("Red Spymaster: {}", red));
        self.chat.push_system(format!("Blue Spymaster: {}", blue));
        info!(
            "Room {}: game started, {} to move, spymasters {} / {}",
            self.id, game.turn, red, blue
        );

        self.game = Some(game);
        Ok("Game started!".to_string())
    }

    fn spymaster_name(&self, game: &GameState, team: Team) -> String {
        game.spymaster(team)
            .and_then(|id| self.members.get(&id))
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "None".to_string())
    }

    fn name_of(&self, id: SessionId) -> String {
        self.members
            .get(&id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn game_mut(&mut self) -> Result<&mut GameState, GameError> {
        self.game.as_mut().ok_or(GameError::NotInProgress)
    }

    pub fn process_clue(&mut self, id: SessionId, word: &str, number: i64) -> Result<(), GameError> {
        let name = self.name_of(id);
        let game = self.game_mut()?;
        game.process_clue(id, word, number)?;
        let clue = game.clue_word().to_string();
        self.chat.push(format!("{} gave clue: '{}' ({})", name, clue, number));
        info!("Room {}: clue '{}' ({}) given by {}", self.id, clue, number, name);
        Ok(())
    }

    /// Resolves a guess and returns the outcome together with the line announced to the room.
    pub fn process_guess(&mut self, id: SessionId, word: &str) -> Result<(GuessOutcome, String), GameError> {
        let name = self.name_of(id);
        let game = self.game_mut()?;
        let ending_team = game.turn;
        let outcome = game.process_guess(id, word)?;
        let winner = game.winner;

        let message = match outcome.result {
            GuessResult::NotOnBoard => "Word not found on the board. Your turn ends.".to_string(),
            GuessResult::OwnCard => format!("{} guessed their own word: {}.", name, outcome.word),
            GuessResult::Innocent => format!(
                "{} guessed an Innocent bystander: {}. Turn ends!",
                name, outcome.word
            ),
            GuessResult::Assassin => format!(
                "{} guessed the Assassin word: {}! Game Over!",
                name, outcome.word
            ),
            GuessResult::OpponentCard => format!(
                "{} guessed opponent's word: {}. Turn ends!",
                name, outcome.word
            ),
        };

        if outcome.result == GuessResult::NotOnBoard {
            self.chat
                .push(format!("{} guessed '{}' (not on board).", name, outcome.word));
        } else {
            self.chat.push(message.clone());
        }
        match winner {
            Some(Winner::Red) if outcome.game_over => self.chat.push_system("RED TEAM WINS!"),
            Some(Winner::Blue) if outcome.game_over => self.chat.push_system("BLUE TEAM WINS!"),
            _ => {}
        }
        if outcome.turn_ended && !outcome.game_over {
            self.chat.push_system(format!(
                "{}'s turn has ended.",
                ending_team.as_str().to_uppercase()
            ));
        }
        info!("Room {}: {}", self.id, message);

        Ok((outcome, message))
    }

    pub fn process_end_turn(&mut self, id: SessionId) -> Result<(), GameError> {
        let name = self.name_of(id);
        let game = self.game_mut()?;
        let ending_team = game.turn;
        game.process_end_turn(id)?;
        self.chat.push_system(format!(
            "{}'s turn has ended.",
            ending_team.as_str().to_uppercase()
        ));
        self.chat.push(format!("{} explicitly ended turn.", name));
        info!("Room {}: {} explicitly ended turn", self.id, name);
        Ok(())
    }

    /// Snapshot of the game as `viewer` may see it; `None` before the first game.
    pub fn view_for(&self, viewer: SessionId) -> Option<GameStateView> {
        let game = self.game.as_ref()?;
        let member = self.members.get(&viewer);
        let is_spymaster = member.and_then(|m| m.role) == Some(Role::Spymaster);

        Some(GameStateView {
            board: game.board_view(is_spymaster),
            red_score: game.red_score,
            blue_score: game.blue_score,
            turn: game.turn,
            clue_word: game.clue_word().to_string(),
            clue_number: game.clue_number(),
            guesses_made: game.guesses_made,
            game_over: game.game_over,
            winner: game.winner,
            is_spymaster,
            spymaster_red: game.spymaster_red.map(SessionId::get),
            spymaster_blue: game.spymaster_blue.map(SessionId::get),
            operative_red: game.operatives_red.iter().map(|id| id.get()).collect(),
            operative_blue: game.operatives_blue.iter().map(|id| id.get()).collect(),
            my_team: member.and_then(|m| m.team),
            my_role: member.and_then(|m| m.role),
        })
    }
}
