/// Which side sent the winning Commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

/// Packet direction a set of keys is installed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sender,
    Receiver,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Sender, Direction::Receiver];
}
