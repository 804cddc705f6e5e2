//! Two-agent episode driver.
//!
//! A [`Board`] owns the game state for the lifetime of an episode, asks the
//! active agent for a move index over the legal moves, applies it, inverts
//! the perspective and hands the position to the other agent. Termination,
//! draw counting and result propagation live here; everything the outside
//! world sees goes through the [`EpisodeObserver`] capability.

use crate::agent::Agent;
use crate::error::TrainError;
use crate::game::{GameResult, GameState, SubMove};

/// Callback surface consumed by the board and the engine.
///
/// All methods default to no-ops so callers implement only what they watch.
/// Agent identity is handed over as a string id, never as a reference into
/// the population.
pub trait EpisodeObserver {
    /// Gates the work of building preview states; return `true` to receive
    /// `publish_state` calls for every ply.
    fn observes_states(&self) -> bool {
        false
    }

    /// Board cells and the sub-moves of the move that produced them, in
    /// canonical (white) orientation, plus the id of the side to play next.
    fn publish_state(&mut self, _cells: &[i32], _sub_moves: &[SubMove], _to_play: &str) {}

    fn publish_stats(&mut self, _whites_wins: u32, _blacks_wins: u32, _episode: u32) {}

    /// Polled before every ply; `true` finishes the current episode as a
    /// draw.
    fn cancelled(&self) -> bool {
        false
    }

    fn error(&mut self, _message: &str) {}
}

/// Observer that watches nothing.
pub struct NullObserver;

impl EpisodeObserver for NullObserver {}

enum Outcome {
    /// The side to move has no legal move and loses.
    MoverLoses,
    Draw,
}

/// Seats two agents at a game and plays complete episodes between them.
///
/// Agent 0 plays white (moves first from the canonical orientation); the
/// board keeps `state.inverted() == (to_move == 1)` as an invariant and
/// treats any disagreement as fatal.
pub struct Board<'a, S> {
    agents: [Agent<'a>; 2],
    to_move: usize,
    state: S,
    whites_wins: u32,
    blacks_wins: u32,
}

impl<'a, S: GameState> Board<'a, S> {
    pub fn new(white: impl Into<Agent<'a>>, black: impl Into<Agent<'a>>) -> Self {
        Self {
            agents: [white.into(), black.into()],
            to_move: 0,
            state: S::initial(),
            whites_wins: 0,
            blacks_wins: 0,
        }
    }

    pub fn whites_wins(&self) -> u32 {
        self.whites_wins
    }

    pub fn blacks_wins(&self) -> u32 {
        self.blacks_wins
    }

    pub fn reset_wins(&mut self) {
        self.whites_wins = 0;
        self.blacks_wins = 0;
    }

    /// Exchanges the two seats, zeroing the win counters and the state.
    pub fn swap_agents(&mut self) {
        self.agents.swap(0, 1);
        self.reset_wins();
        self.state = S::initial();
        self.to_move = 0;
    }

    /// Plays `episodes` complete games from `seed`.
    ///
    /// An episode ends when the side to move has no legal move (it loses),
    /// when more than `max_moves_without_capture` consecutive plies pass
    /// without a capture (draw), or when the observer reports cancellation
    /// (draw). Errors are surfaced through the observer and stop the loop;
    /// the error is also returned so callers can tell fatal inconsistencies
    /// from per-pair failures.
    pub fn play(
        &mut self,
        episodes: u32,
        seed: &S,
        max_moves_without_capture: u32,
        observer: &mut dyn EpisodeObserver,
    ) -> Result<(), TrainError> {
        match self.play_all(episodes, seed, max_moves_without_capture, observer) {
            Ok(()) => Ok(()),
            Err(err) => {
                observer.error(&err.to_string());
                Err(err)
            }
        }
    }

    fn play_all(
        &mut self,
        episodes: u32,
        seed: &S,
        max_moves_without_capture: u32,
        observer: &mut dyn EpisodeObserver,
    ) -> Result<(), TrainError> {
        if seed.inverted() {
            return Err(TrainError::InconsistentState(
                "episode seed must be in canonical orientation".into(),
            ));
        }

        for episode in 0..episodes {
            if observer.cancelled() {
                return Ok(());
            }

            self.state = seed.clone();
            self.to_move = 0;
            let mut quiet = 0u32;

            if observer.observes_states() {
                let to_play = self.agents[self.to_move].id().to_string();
                observer.publish_state(&self.state.cells(), &[], &to_play);
            }

            let outcome = loop {
                self.check_alignment()?;

                let moves = self.state.legal_moves();
                if moves.is_empty() {
                    break Outcome::MoverLoses;
                }

                let chosen = self.agents[self.to_move].make_move(&self.state, &moves)?;
                if chosen >= moves.len() {
                    return Err(TrainError::InconsistentState(format!(
                        "agent chose move {chosen} of {}",
                        moves.len()
                    )));
                }
                let mv = &moves[chosen];

                if observer.observes_states() {
                    self.publish_preview(mv, observer);
                }

                quiet = if mv.is_capture() { 0 } else { quiet + 1 };
                self.state.apply(mv);
                self.state.invert();
                self.to_move = 1 - self.to_move;

                if quiet > max_moves_without_capture {
                    break Outcome::Draw;
                }
                if observer.cancelled() {
                    break Outcome::Draw;
                }
            };

            self.settle(outcome);
            observer.publish_stats(self.whites_wins, self.blacks_wins, episode + 1);
        }

        Ok(())
    }

    fn check_alignment(&self) -> Result<(), TrainError> {
        if self.state.inverted() != (self.to_move == 1) {
            return Err(TrainError::InconsistentState(
                "inverted flag disagrees with the side to move".into(),
            ));
        }
        Ok(())
    }

    fn publish_preview(&mut self, mv: &crate::game::Move, observer: &mut dyn EpisodeObserver) {
        let mut preview = self.state.preview(mv);
        let shown = if preview.inverted() {
            preview.invert();
            self.state.mirrored_move(mv)
        } else {
            mv.clone()
        };
        // Seats have not been swapped yet, so the side to play next is the
        // waiting agent.
        let to_play = self.agents[1 - self.to_move].id().to_string();
        observer.publish_state(&preview.cells(), &shown.sub_moves, &to_play);
    }

    fn settle(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::MoverLoses => {
                let loser = self.to_move;
                let winner = 1 - loser;
                if loser == 1 {
                    self.whites_wins += 1;
                } else {
                    self.blacks_wins += 1;
                }
                let winner_id = self.agents[winner].id().to_string();
                let loser_id = self.agents[loser].id().to_string();
                self.agents[loser].game_over(GameResult::Loss, loser == 0, &winner_id);
                self.agents[winner].game_over(GameResult::Victory, winner == 0, &loser_id);
            }
            Outcome::Draw => {
                let white_id = self.agents[0].id().to_string();
                let black_id = self.agents[1].id().to_string();
                self.agents[0].game_over(GameResult::Draw, true, &black_id);
                self.agents[1].game_over(GameResult::Draw, false, &white_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RandomAgent;
    use crate::testgame::TakeAway;

    struct Stats {
        episodes: u32,
        whites: u32,
        blacks: u32,
        errors: Vec<String>,
    }

    impl EpisodeObserver for Stats {
        fn publish_stats(&mut self, whites_wins: u32, blacks_wins: u32, episode: u32) {
            self.whites = whites_wins;
            self.blacks = blacks_wins;
            self.episodes = episode;
        }
        fn error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    #[test]
    fn test_every_episode_has_a_result() {
        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);
        let mut stats = Stats { episodes: 0, whites: 0, blacks: 0, errors: Vec::new() };

        board.play(20, &TakeAway::initial(), 100, &mut stats).unwrap();

        assert_eq!(stats.episodes, 20);
        assert!(stats.errors.is_empty());
        assert_eq!(stats.whites + stats.blacks, 20);
    }

    #[test]
    fn test_zero_episodes_is_a_no_op() {
        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);

        board.play(0, &TakeAway::initial(), 100, &mut NullObserver).unwrap();

        assert_eq!(board.whites_wins() + board.blacks_wins(), 0);
    }

    #[test]
    fn test_quiet_move_bound_draws() {
        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);
        let mut stats = Stats { episodes: 0, whites: 0, blacks: 0, errors: Vec::new() };

        // A bound of zero draws the game as soon as one quiet ply is made;
        // from 16 stones no game can finish without quiet plies.
        board.play(10, &TakeAway::initial(), 0, &mut stats).unwrap();

        assert_eq!(stats.episodes, 10);
        assert_eq!(stats.whites + stats.blacks, 0);
    }

    #[test]
    fn test_quiet_counter_at_the_bound_is_not_yet_a_draw() {
        // A one-stone pile is a single forced quiet ply. With the bound at 1
        // the counter reaches it exactly and the game still ends as a win;
        // with the bound at 0 the counter exceeds it and the game is drawn.
        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);

        board.play(1, &TakeAway::with_remaining(1), 1, &mut NullObserver).unwrap();
        assert_eq!(board.whites_wins(), 1);

        board.reset_wins();
        board.play(1, &TakeAway::with_remaining(1), 0, &mut NullObserver).unwrap();
        assert_eq!(board.whites_wins() + board.blacks_wins(), 0);
    }

    #[test]
    fn test_inverted_seed_is_rejected() {
        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);
        let mut seed = TakeAway::initial();
        seed.invert();

        let mut stats = Stats { episodes: 0, whites: 0, blacks: 0, errors: Vec::new() };
        let outcome = board.play(1, &seed, 100, &mut stats);

        assert!(matches!(outcome, Err(TrainError::InconsistentState(_))));
        assert_eq!(stats.errors.len(), 1);
    }

    #[test]
    fn test_cancellation_scores_as_draw() {
        struct CancelAll;
        impl EpisodeObserver for CancelAll {
            fn cancelled(&self) -> bool {
                true
            }
        }

        let mut white = RandomAgent::new("w", 1);
        let mut black = RandomAgent::new("b", 2);
        let mut board: Board<TakeAway> = Board::new(&mut white, &mut black);

        board.play(5, &TakeAway::initial(), 100, &mut CancelAll).unwrap();

        assert_eq!(board.whites_wins() + board.blacks_wins(), 0);
    }
}
