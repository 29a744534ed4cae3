//! Question sequence and per-user answer progress.

pub mod model;
pub mod routes;
pub mod seed;

pub use model::{ProgressSummary, Question, QuestionKind, QuestionProgress, UserAccount};
pub use routes::{ProgressRouteState, progress_routes};
pub use seed::default_questions;
