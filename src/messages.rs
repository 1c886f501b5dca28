use std::fmt;

/// Phase of the link to the wearable. Owned by the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Which way the hand should move to reach the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionCode {
    Forward,
    Left,
    Right,
    Up,
    Down,
    None,
}

impl DirectionCode {
    /// Byte understood by the wearable, or `None` when there is nothing to send.
    pub fn wire_value(self) -> Option<u8> {
        match self {
            DirectionCode::Right => Some(1),
            DirectionCode::Left => Some(2),
            DirectionCode::Up => Some(3),
            DirectionCode::Down => Some(4),
            DirectionCode::Forward => Some(5),
            DirectionCode::None => None,
        }
    }
}

/// One haptic write: a single byte on the haptic characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackFrame(u8);

impl FeedbackFrame {
    /// Silences the actuators. Sent on shutdown, never by the guidance path.
    pub const OFF: FeedbackFrame = FeedbackFrame(0);

    pub fn from_direction(code: DirectionCode) -> Option<Self> {
        code.wire_value().map(FeedbackFrame)
    }

    pub fn as_bytes(&self) -> [u8; 1] {
        [self.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(DirectionCode::Right.wire_value(), Some(1));
        assert_eq!(DirectionCode::Left.wire_value(), Some(2));
        assert_eq!(DirectionCode::Up.wire_value(), Some(3));
        assert_eq!(DirectionCode::Down.wire_value(), Some(4));
        assert_eq!(DirectionCode::Forward.wire_value(), Some(5));
        assert_eq!(DirectionCode::None.wire_value(), None);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(FeedbackFrame::from_direction(DirectionCode::Forward).map(|f| f.as_bytes()), Some([5]));
        assert!(FeedbackFrame::from_direction(DirectionCode::None).is_none());
        assert_eq!(FeedbackFrame::OFF.as_bytes(), [0]);
    }
}
