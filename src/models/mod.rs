pub mod rating;
pub mod session;

pub use rating::{parse_date, NewRating, RatingId, RatingScores, ReadinessRating};
pub use session::{NewSession, Session, SessionId, DEFAULT_DEVICE};
