pub const HOLDER_SPACE_X: u16 = 0xFFFF;
const CONTAINER_FLAG_Y: u16 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    East,
    South,
    West,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionDelta {
    pub dx: i16,
    pub dy: i16,
    pub dz: i8,
}

impl Position {
    pub fn new(x: u16, y: u16, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, delta: PositionDelta) -> Option<Self> {
        let x = i32::from(self.x) + i32::from(delta.dx);
        let y = i32::from(self.y) + i32::from(delta.dy);
        let z = i16::from(self.z) + i16::from(delta.dz);

        if x < 0 || y < 0 || z < 0 {
            return None;
        }

        if x > i32::from(u16::MAX) || y > i32::from(u16::MAX) || z > i16::from(u8::MAX) {
            return None;
        }

        Some(Self {
            x: x as u16,
            y: y as u16,
            z: z as u8,
        })
    }

    pub fn step(self, direction: Direction) -> Option<Self> {
        self.offset(direction.delta())
    }

    /// A position with `x == 0xFFFF` names inventory/container space rather
    /// than a map tile. `y & 0x40` selects container addressing: the low bits
    /// of `y` are the open-container id and `z` is the index inside it.
    /// Otherwise `y` is an equipment slot index.
    pub fn is_holder_space(self) -> bool {
        self.x == HOLDER_SPACE_X
    }

    pub fn holder_container(self) -> Option<(u8, u8)> {
        if self.is_holder_space() && self.y & CONTAINER_FLAG_Y != 0 {
            Some(((self.y & 0x3F) as u8, self.z))
        } else {
            None
        }
    }

    pub fn holder_slot(self) -> Option<u8> {
        if self.is_holder_space() && self.y & CONTAINER_FLAG_Y == 0 {
            Some(self.y as u8)
        } else {
            None
        }
    }

    pub fn distance_x(self, other: Position) -> u16 {
        self.x.abs_diff(other.x)
    }

    pub fn distance_y(self, other: Position) -> u16 {
        self.y.abs_diff(other.y)
    }

    pub fn distance_z(self, other: Position) -> u8 {
        self.z.abs_diff(other.z)
    }

    pub fn in_range(self, other: Position, range_x: u16, range_y: u16) -> bool {
        self.distance_x(other) <= range_x && self.distance_y(other) <= range_y
    }

    pub fn in_range_z(self, other: Position, range_x: u16, range_y: u16, range_z: u8) -> bool {
        self.in_range(other, range_x, range_y) && self.distance_z(other) <= range_z
    }

    pub fn direction_to(self, other: Position) -> Direction {
        let west = other.x < self.x;
        let east = other.x > self.x;
        let north = other.y < self.y;
        let south = other.y > self.y;
        match (north, south, west, east) {
            (true, _, true, _) => Direction::Northwest,
            (true, _, _, true) => Direction::Northeast,
            (_, true, true, _) => Direction::Southwest,
            (_, true, _, true) => Direction::Southeast,
            (true, _, _, _) => Direction::North,
            (_, true, _, _) => Direction::South,
            (_, _, true, _) => Direction::West,
            _ => Direction::East,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl Direction {
    pub fn delta(self) -> PositionDelta {
        match self {
            Direction::North => PositionDelta { dx: 0, dy: -1, dz: 0 },
            Direction::East => PositionDelta { dx: 1, dy: 0, dz: 0 },
            Direction::South => PositionDelta { dx: 0, dy: 1, dz: 0 },
            Direction::West => PositionDelta { dx: -1, dy: 0, dz: 0 },
            Direction::Northeast => PositionDelta { dx: 1, dy: -1, dz: 0 },
            Direction::Northwest => PositionDelta { dx: -1, dy: -1, dz: 0 },
            Direction::Southeast => PositionDelta { dx: 1, dy: 1, dz: 0 },
            Direction::Southwest => PositionDelta { dx: -1, dy: 1, dz: 0 },
        }
    }

    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::Northeast
                | Direction::Northwest
                | Direction::Southeast
                | Direction::Southwest
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opposite(direction: Direction) -> Direction {
        match direction {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::Northeast => Direction::Southwest,
            Direction::Northwest => Direction::Southeast,
            Direction::Southeast => Direction::Northwest,
            Direction::Southwest => Direction::Northeast,
        }
    }

    #[test]
    fn step_roundtrip_with_opposites() {
        let origin = Position { x: 100, y: 100, z: 7 };
        let directions = [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
            Direction::Northeast,
            Direction::Northwest,
            Direction::Southeast,
            Direction::Southwest,
        ];
        for direction in directions {
            let next = origin.step(direction).expect("step");
            let back = next.step(opposite(direction)).expect("step back");
            assert_eq!(back, origin);
        }
    }

    #[test]
    fn holder_space_container_decoding() {
        let wire = Position { x: 0xFFFF, y: 0x40 | 3, z: 5 };
        assert!(wire.is_holder_space());
        assert_eq!(wire.holder_container(), Some((3, 5)));
        assert_eq!(wire.holder_slot(), None);
    }

    #[test]
    fn holder_space_slot_decoding() {
        let wire = Position { x: 0xFFFF, y: 4, z: 0 };
        assert!(wire.is_holder_space());
        assert_eq!(wire.holder_slot(), Some(4));
        assert_eq!(wire.holder_container(), None);
    }

    #[test]
    fn map_position_is_not_holder_space() {
        let pos = Position { x: 120, y: 0x40, z: 7 };
        assert!(!pos.is_holder_space());
        assert_eq!(pos.holder_container(), None);
        assert_eq!(pos.holder_slot(), None);
    }

    #[test]
    fn direction_to_prefers_diagonals() {
        let origin = Position { x: 100, y: 100, z: 7 };
        assert_eq!(
            origin.direction_to(Position { x: 101, y: 99, z: 7 }),
            Direction::Northeast
        );
        assert_eq!(
            origin.direction_to(Position { x: 99, y: 100, z: 7 }),
            Direction::West
        );
    }
}
