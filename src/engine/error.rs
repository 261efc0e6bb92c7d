use crate::model::Conflict;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input: date ordering, empty required field.
    Validation(String),
    RoomUnavailable {
        room: String,
        conflicts: Vec<Conflict>,
    },
    BookingNotFound(String),
    LimitExceeded(&'static str),
    IdSpaceExhausted,
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::RoomUnavailable { room, conflicts } => {
                write!(f, "room {room} is not available for the requested dates: booked by ")?;
                for (i, c) in conflicts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::IdSpaceExhausted => {
                write!(f, "could not allocate an unused booking id, try again")
            }
            EngineError::Store(e) => write!(f, "record store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
