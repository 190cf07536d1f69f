/// Closed result-code set for every fallible holder or transfer operation.
/// Validation failures are values, never errors: callers surface
/// `description()` as the user-facing cancellation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NotPossible,
    NotEnoughRoom,
    NotEnoughCapacity,
    NeedsExchange,
    NotMoveable,
    ActorNotPermitted,
    TooFarAway,
    ThereIsNoWay,
    DestinationOutOfReach,
    CannotThrow,
    FirstGoUpstairs,
    FirstGoDownstairs,
}

impl Outcome {
    pub fn is_ok(self) -> bool {
        self == Outcome::Ok
    }

    pub fn description(self) -> &'static str {
        match self {
            Outcome::Ok => "done",
            Outcome::NotPossible => "sorry, not possible",
            Outcome::NotEnoughRoom => "there is not enough room",
            Outcome::NotEnoughCapacity => "this object is too heavy",
            Outcome::NeedsExchange => "you need to exchange it first",
            Outcome::NotMoveable => "you cannot move this object",
            Outcome::ActorNotPermitted => "you are not the owner",
            Outcome::TooFarAway => "it is too far away",
            Outcome::ThereIsNoWay => "there is no way",
            Outcome::DestinationOutOfReach => "destination is out of reach",
            Outcome::CannotThrow => "you cannot throw there",
            Outcome::FirstGoUpstairs => "first go upstairs",
            Outcome::FirstGoDownstairs => "first go downstairs",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_is_ok() {
        assert!(Outcome::Ok.is_ok());
        for outcome in [
            Outcome::NotPossible,
            Outcome::NotEnoughRoom,
            Outcome::NotEnoughCapacity,
            Outcome::NeedsExchange,
            Outcome::NotMoveable,
            Outcome::ActorNotPermitted,
            Outcome::TooFarAway,
            Outcome::ThereIsNoWay,
            Outcome::DestinationOutOfReach,
            Outcome::CannotThrow,
            Outcome::FirstGoUpstairs,
            Outcome::FirstGoDownstairs,
        ] {
            assert!(!outcome.is_ok(), "{:?}", outcome);
        }
    }
}
