//! Architecture search over the trained super-network.
//!
//! [`space`] defines what a candidate is, [`aging`] proposes candidates,
//! [`pool`] evaluates a generation in parallel and [`driver`] runs the
//! generation loop against a cost budget.

pub mod aging;
pub mod driver;
pub mod evaluate;
pub mod history;
pub mod pool;
pub mod space;

pub use aging::{scalarize, AgingEvolution, BOUND_PENALTY};
pub use driver::{bound_distances, resume_search, within_bounds, AgingEvolutionSearch};
pub use evaluate::TrainingEvaluator;
pub use history::{History, HistoryEntry, HistoryFile};
pub use pool::{task_seed, Candidate, EvaluationPool, Evaluator, TaskContext};
pub use space::{Parametrization, SearchSpace};
