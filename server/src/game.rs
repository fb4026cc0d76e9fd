//! Authoritative game rules for a single room: board generation, team and role
//! assignment, and the clue/guess/end-turn cycle with scoring and win detection.
//!
//! Scores count the cards a team still has to find. They are set once when the board
//! is generated and only ever decremented afterwards.

use crate::registry::SessionId;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{
    CardColor, CardView, Team, Winner, ASSASSIN_CARDS, BLUE_CARDS, BOARD_SIZE, INNOCENT_CARDS,
    MAX_CLUE_NUMBER, RED_CARDS, WORD_POOL,
};
use thiserror::Error;

/// Request validation failures. The display text is what the requester is told.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Not enough players to start game (minimum 2 required).")]
    NotEnoughPlayers,

    #[error("Game is already in progress.")]
    AlreadyInProgress,

    #[error("Game not in progress.")]
    NotInProgress,

    #[error("Game is over.")]
    GameOver,

    #[error("It's {}'s turn, but you are not the {} Spymaster.", title(.turn), title(.turn))]
    NotSpymasterForTurn { turn: Team },

    #[error("A clue has already been given this turn.")]
    CluePending,

    #[error("Invalid clue word or number.")]
    InvalidClue,

    #[error("No clue has been given yet.")]
    NoClue,

    #[error("It's not your team's turn or you are not an operative for the current turn.")]
    NotOperativeForTurn,

    #[error("You have used all your guesses for this clue. Please end your turn.")]
    GuessBudgetExhausted,

    #[error("'{0}' has already been revealed.")]
    AlreadyRevealed(String),
}

fn title(team: &Team) -> &'static str {
    match team {
        Team::Red => "Red",
        Team::Blue => "Blue",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub word: String,
    pub color: CardColor,
    pub revealed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clue {
    pub word: String,
    pub number: u8,
}

/// What a resolved guess uncovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessResult {
    NotOnBoard,
    OwnCard,
    Innocent,
    Assassin,
    OpponentCard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuessOutcome {
    pub result: GuessResult,
    /// Board spelling of the guessed word, or the guess itself when it missed the board.
    pub word: String,
    pub turn_ended: bool,
    pub game_over: bool,
}

impl GuessOutcome {
    /// A guess that named no board word is reported back as a failure.
    pub fn is_success(&self) -> bool {
        self.result != GuessResult::NotOnBoard
    }
}

/// Team membership produced by [`assign_teams`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamAssignment {
    pub red: Vec<SessionId>,
    pub blue: Vec<SessionId>,
}

/// Splits players into two teams, honouring their preferences where possible.
///
/// Players without a preference are shuffled and handed one at a time to the smaller
/// team, red on ties. If either team is still empty afterwards one player crosses over.
pub fn assign_teams<R: Rng>(rng: &mut R, players: &[(SessionId, Option<Team>)]) -> TeamAssignment {
    let mut shuffled = players.to_vec();
    shuffled.shuffle(rng);

    let mut assignment = TeamAssignment::default();
    let mut undecided = Vec::new();
    for (id, choice) in shuffled {
        match choice {
            Some(Team::Red) => assignment.red.push(id),
            Some(Team::Blue) => assignment.blue.push(id),
            None => undecided.push(id),
        }
    }

    undecided.shuffle(rng);
    for id in undecided {
        if assignment.red.len() <= assignment.blue.len() {
            assignment.red.push(id);
        } else {
            assignment.blue.push(id);
        }
    }

    if assignment.red.is_empty() && !assignment.blue.is_empty() {
        let moved = assignment.blue.remove(0);
        debug!("Moved session {} from blue to red so both teams have players", moved);
        assignment.red.push(moved);
    }
    if assignment.blue.is_empty() && !assignment.red.is_empty() {
        let moved = assignment.red.remove(0);
        debug!("Moved session {} from red to blue so both teams have players", moved);
        assignment.blue.push(moved);
    }

    assignment
}

/// Draws 25 distinct words and deals the fixed colour distribution across them.
pub fn generate_board<R: Rng>(rng: &mut R) -> Vec<Card> {
    let words: Vec<&str> = WORD_POOL.choose_multiple(rng, BOARD_SIZE).copied().collect();

    let mut colors = Vec::with_capacity(BOARD_SIZE);
    colors.extend(std::iter::repeat(CardColor::Red).take(RED_CARDS));
    colors.extend(std::iter::repeat(CardColor::Blue).take(BLUE_CARDS));
    colors.extend(std::iter::repeat(CardColor::Innocent).take(INNOCENT_CARDS));
    colors.extend(std::iter::repeat(CardColor::Assassin).take(ASSASSIN_CARDS));
    colors.shuffle(rng);

    words
        .into_iter()
        .zip(colors)
        .map(|(word, color)| Card {
            word: word.to_string(),
            color,
            revealed: false,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub board: Vec<Card>,
    pub red_score: u8,
    pub blue_score: u8,
    pub turn: Team,
    pub clue: Option<Clue>,
    pub guesses_made: u8,
    pub game_over: bool,
    pub winner: Option<Winner>,
    pub spymaster_red: Option<SessionId>,
    pub spymaster_blue: Option<SessionId>,
    pub operatives_red: Vec<SessionId>,
    pub operatives_blue: Vec<SessionId>,
}

impl GameState {
    /// Deals a fresh board, picks the starting team and assigns every player a team and role.
    pub fn new<R: Rng>(rng: &mut R, players: &[(SessionId, Option<Team>)]) -> Self {
        let board = generate_board(rng);
        let red_score = count_color(&board, CardColor::Red);
        let blue_score = count_color(&board, CardColor::Blue);
        let turn = if rng.gen_bool(0.5) { Team::Red } else { Team::Blue };

        let mut state = Self {
            board,
            red_score,
            blue_score,
            turn,
            clue: None,
            guesses_made: 0,
            game_over: false,
            winner: None,
            spymaster_red: None,
            spymaster_blue: None,
            operatives_red: Vec::new(),
            operatives_blue: Vec::new(),
        };

        let teams = assign_teams(rng, players);
        state.assign_roles(rng, Team::Red, &teams.red);
        state.assign_roles(rng, Team::Blue, &teams.blue);
        state
    }

    fn assign_roles<R: Rng>(&mut self, rng: &mut R, team: Team, members: &[SessionId]) {
        let Some(&spymaster) = members.choose(rng) else {
            return;
        };

        let mut operatives: Vec<SessionId> =
            members.iter().copied().filter(|id| *id != spymaster).collect();
        // A spymaster also guesses for their team; this keeps one-player teams playable.
        operatives.push(spymaster);

        match team {
            Team::Red => {
                self.spymaster_red = Some(spymaster);
                self.operatives_red = operatives;
            }
            Team::Blue => {
                self.spymaster_blue = Some(spymaster);
                self.operatives_blue = operatives;
            }
        }
    }

    pub fn spymaster(&self, team: Team) -> Option<SessionId> {
        match team {
            Team::Red => self.spymaster_red,
            Team::Blue => self.spymaster_blue,
        }
    }

    pub fn operatives(&self, team: Team) -> &[SessionId] {
        match team {
            Team::Red => &self.operatives_red,
            Team::Blue => &self.operatives_blue,
        }
    }

    pub fn score(&self, team: Team) -> u8 {
        match team {
            Team::Red => self.red_score,
            Team::Blue => self.blue_score,
        }
    }

    fn score_mut(&mut self, team: Team) -> &mut u8 {
        match team {
            Team::Red => &mut self.red_score,
            Team::Blue => &mut self.blue_score,
        }
    }

    pub fn is_spymaster(&self, id: SessionId) -> bool {
        self.spymaster_red == Some(id) || self.spymaster_blue == Some(id)
    }

    fn is_operative_on_turn(&self, id: SessionId) -> bool {
        self.operatives(self.turn).contains(&id)
    }

    pub fn clue_word(&self) -> &str {
        self.clue.as_ref().map(|c| c.word.as_str()).unwrap_or("")
    }

    pub fn clue_number(&self) -> u8 {
        self.clue.as_ref().map(|c| c.number).unwrap_or(0)
    }

    pub fn process_clue(&mut self, id: SessionId, word: &str, number: i64) -> Result<(), GameError> {
        if self.game_over {
            return Err(GameError::GameOver);
        }
        if self.spymaster(self.turn) != Some(id) {
            return Err(GameError::NotSpymasterForTurn { turn: self.turn });
        }
        if self.clue.is_some() {
            return Err(GameError::CluePending);
        }
        if word.trim().is_empty() || !(0..=MAX_CLUE_NUMBER).contains(&number) {
            return Err(GameError::InvalidClue);
        }

        self.clue = Some(Clue {
            word: word.to_uppercase(),
            number: number as u8,
        });
        self.guesses_made = 0;
        Ok(())
    }

    pub fn process_guess(&mut self, id: SessionId, guess: &str) -> Result<GuessOutcome, GameError> {
        if self.game_over {
            return Err(GameError::GameOver);
        }
        let Some(clue_number) = self.clue.as_ref().map(|c| c.number) else {
            return Err(GameError::NoClue);
        };
        if !self.is_operative_on_turn(id) {
            return Err(GameError::NotOperativeForTurn);
        }
        if self.guesses_made > clue_number {
            return Err(GameError::GuessBudgetExhausted);
        }

        let wanted = guess.to_lowercase();
        let Some(index) = self
            .board
            .iter()
            .position(|card| card.word.to_lowercase() == wanted)
        else {
            self.guesses_made += 1;
            self.advance_turn();
            return Ok(GuessOutcome {
                result: GuessResult::NotOnBoard,
                word: guess.to_string(),
                turn_ended: true,
                game_over: false,
            });
        };

        if self.board[index].revealed {
            return Err(GameError::AlreadyRevealed(self.board[index].word.clone()));
        }

        self.board[index].revealed = true;
        self.guesses_made += 1;

        let color = self.board[index].color;
        let team = self.turn;
        let result = if color == CardColor::from(team) {
            *self.score_mut(team) -= 1;
            GuessResult::OwnCard
        } else if color == CardColor::Innocent {
            GuessResult::Innocent
        } else if color == CardColor::Assassin {
            self.game_over = true;
            self.winner = Some(team.opponent().into());
            GuessResult::Assassin
        } else {
            *self.score_mut(team.opponent()) -= 1;
            GuessResult::OpponentCard
        };

        if self.red_score == 0 {
            self.game_over = true;
            self.winner = Some(Winner::Red);
        } else if self.blue_score == 0 {
            self.game_over = true;
            self.winner = Some(Winner::Blue);
        }

        let turn_ended =
            result != GuessResult::OwnCard || self.game_over || self.guesses_made > clue_number;
        if turn_ended {
            self.advance_turn();
        }

        if self.game_over {
            info!("Game over after guessing {}: winner {:?}", self.board[index].word, self.winner);
        }

        Ok(GuessOutcome {
            result,
            word: self.board[index].word.clone(),
            turn_ended,
            game_over: self.game_over,
        })
    }

    pub fn process_end_turn(&mut self, id: SessionId) -> Result<(), GameError> {
        if self.game_over {
            return Err(GameError::GameOver);
        }
        if !self.is_operative_on_turn(id) {
            return Err(GameError::NotOperativeForTurn);
        }
        if self.clue.is_none() {
            return Err(GameError::NoClue);
        }
        self.advance_turn();
        Ok(())
    }

    /// Clears the clue and hands play to the other team.
    fn advance_turn(&mut self) {
        self.clue = None;
        self.guesses_made = 0;
        self.turn = self.turn.opponent();
    }

    /// Ends the game without a winner, used when a spymaster walks out.
    pub fn abandon(&mut self) {
        self.game_over = true;
        self.winner = Some(Winner::Draw);
    }

    /// Drops a departing player from the operative lists.
    pub fn forget_operative(&mut self, id: SessionId) {
        self.operatives_red.retain(|op| *op != id);
        self.operatives_blue.retain(|op| *op != id);
    }

    /// Board as seen by one viewer. Colours of unrevealed cards are only shown to spymasters.
    pub fn board_view(&self, sees_colors: bool) -> Vec<CardView> {
        self.board
            .iter()
            .map(|card| CardView {
                word: card.word.clone(),
                color: (card.revealed || sees_colors).then_some(card.color),
                revealed: card.revealed,
            })
            .collect()
    }
}

fn count_color(board: &[Card], color: CardColor) -> u8 {
    board.iter().filter(|card| card.color == color).count() as u8
}
