//! End-to-end scenarios: whole episodes and training runs over real checkers
//! rules, including checkpoint resume.

use checkers::Position;
use selfplay::agent::{EnsembleAgent, TdLambdaAgent};
use selfplay::board::{Board, EpisodeObserver, NullObserver};
use selfplay::engine::{CancelToken, PerformanceRec, RunConfig, TrainingEngine};
use selfplay::game::{GameState, SubMove};
use selfplay::state::TrainingState;

struct Recorder {
    plies: Vec<Vec<i32>>,
}

impl EpisodeObserver for Recorder {
    fn observes_states(&self) -> bool {
        true
    }

    fn publish_state(&mut self, cells: &[i32], _sub_moves: &[SubMove], _to_play: &str) {
        self.plies.push(cells.to_vec());
    }
}

fn agent(name: &str, seed: u64) -> TdLambdaAgent {
    TdLambdaAgent::new(&[32, 16, 1], 0.0, 0.7, 0.95, 0.05, name, seed).unwrap()
}

fn record_episode() -> Vec<Vec<i32>> {
    let mut white = agent("white", 100);
    let mut black = agent("black", 200);
    let mut recorder = Recorder { plies: Vec::new() };
    let mut board: Board<Position> = Board::new(&mut white, &mut black);
    board.play(1, &Position::start(), 200, &mut recorder).unwrap();
    recorder.plies
}

#[test]
fn test_episode_is_reproducible_ply_by_ply() {
    let first = record_episode();
    let second = record_episode();
    assert!(first.len() > 1);
    assert_eq!(first, second);
}

#[test]
fn test_published_states_are_in_canonical_orientation() {
    // Preview cells always describe the board from white's side, so the
    // marker codes 3 and 4 must appear for black's moves too.
    let plies = record_episode();
    let with_markers = plies
        .iter()
        .skip(1)
        .filter(|cells| cells.iter().any(|&c| c == 3 || c == 4))
        .count();
    assert!(with_markers > 0);
    assert_eq!(plies[0].iter().filter(|&&c| c == 1).count(), 12);
    assert_eq!(plies[0].iter().filter(|&&c| c == -1).count(), 12);
}

#[test]
fn test_ensemble_round_trips_and_plays_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("committee.ena");

    let members = [agent("m0", 7), agent("m1", 8), agent("m2", 9)];
    let mut original = EnsembleAgent::new(&members, "committee").unwrap();
    original.save_to_file(&path).unwrap();
    let mut loaded = EnsembleAgent::load_from_file(&path).unwrap();
    assert_eq!(loaded, original);

    original.reseed(5);
    loaded.reseed(5);
    original.set_single_agent_mode(true);
    loaded.set_single_agent_mode(true);

    let mut position = Position::start();
    for _ in 0..30 {
        let moves = position.legal_moves();
        if moves.is_empty() {
            break;
        }
        let a = original.make_move(&position, &moves).unwrap();
        let b = loaded.make_move(&position, &moves).unwrap();
        assert_eq!(a, b);
        position.apply(&moves[a]);
        position.invert();
    }
}

fn reporter_into_state(
) -> impl FnMut(&mut TrainingState, u64, &[PerformanceRec]) -> Result<(), selfplay::TrainError> {
    |state: &mut TrainingState, _elapsed: u64, recs: &[PerformanceRec]| {
        state.increment_round();
        state.add_performance_record(recs)?;
        Ok(())
    }
}

#[test]
fn test_checkpoint_resume_keeps_round_numbers_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("state.sdmp");
    let report = dir.path().join("Performance_report.txt");

    let script = "{Name=t;NetDimensions=32,8,1;Exploration=0.1;LearningRate=0.05}[2]";
    let mut state = TrainingState::from_script(script, 31).unwrap();

    let mut cfg = RunConfig::new(3, 2);
    cfg.eval_episodes = 4;
    cfg.max_moves_without_capture = 60;

    let mut engine = TrainingEngine::new(77);
    engine
        .run(
            &mut state,
            &Position::start(),
            &cfg,
            &mut reporter_into_state(),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(state.round_id(), 3);
    state.save_to_file(&dump, false).unwrap();

    let mut resumed = TrainingState::load_from_file(&dump).unwrap();
    assert_eq!(resumed, state);

    let mut cfg = cfg.clone();
    cfg.start_round = resumed.round_id();
    cfg.max_round = 5;
    let mut engine = TrainingEngine::new(78);
    engine
        .run(
            &mut resumed,
            &Position::start(),
            &cfg,
            &mut reporter_into_state(),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(resumed.round_id(), 5);
    let rounds: Vec<u32> = resumed.performances().iter().map(|rec| rec.round).collect();
    assert_eq!(rounds, [1, 2, 3, 4, 5]);

    resumed.save_performance_report(&report).unwrap();
    let text = std::fs::read_to_string(&report).unwrap();
    assert_eq!(text.lines().count(), 6);
    assert!(text.lines().next().unwrap().contains("Round"));
}

#[test]
fn test_training_changes_the_network() {
    let mut white = agent("white", 300);
    let mut black = agent("black", 301);
    let probe = Position::start();
    let before = white.evaluate(&probe);

    let mut board: Board<Position> = Board::new(&mut white, &mut black);
    board.play(3, &Position::start(), 200, &mut NullObserver).unwrap();

    assert_ne!(white.evaluate(&probe), before);
}
