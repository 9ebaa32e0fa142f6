//! Pure derivations behind the dimension tables: time phases, team sides and
//! the catalog of objectives and structures found in the ranked-games dataset.

use std::fmt;

const EARLY_PHASE_END: i64 = 900;
const MID_PHASE_END: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Early,
    Mid,
    Late,
}

impl GamePhase {
    pub fn from_frame(frame: i64) -> Self {
        if frame < EARLY_PHASE_END {
            GamePhase::Early
        } else if frame < MID_PHASE_END {
            GamePhase::Mid
        } else {
            GamePhase::Late
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Early => "Early",
            GamePhase::Mid => "Mid",
            GamePhase::Late => "Late",
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of `dim_time`, derived entirely from the frame value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeFrame {
    pub frame: i64,
    pub minute: i64,
    pub second: i64,
    pub phase: GamePhase,
}

impl TimeFrame {
    pub fn from_frame(frame: i64) -> Self {
        Self {
            frame,
            minute: frame.div_euclid(60),
            second: frame.rem_euclid(60),
            phase: GamePhase::from_frame(frame),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    /// Even team ids are Blue, odd ones Red.
    pub fn from_team_id(team_id: i64) -> Self {
        if team_id % 2 == 0 { Side::Blue } else { Side::Red }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Blue => "Blue",
            Side::Red => "Red",
        }
    }
}

/// Team id assigned to the source row at `position` (0-based).
pub fn positional_team_id(position: usize) -> i64 {
    position as i64 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectiveSpec {
    pub name: &'static str,
    pub category: &'static str,
    pub kind: &'static str,
    pub column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureSpec {
    pub name: &'static str,
    pub lane: &'static str,
    pub structure_type: &'static str,
    pub column: &'static str,
}

pub const DEFAULT_OBJECTIVE_COLUMN: &str = "killedFireDrake";
pub const DEFAULT_STRUCTURE_COLUMN: &str = "destroyedTopInhibitor";

const fn objective(
    name: &'static str,
    category: &'static str,
    kind: &'static str,
    column: &'static str,
) -> ObjectiveSpec {
    ObjectiveSpec {
        name,
        category,
        kind,
        column,
    }
}

const fn structure(
    name: &'static str,
    lane: &'static str,
    structure_type: &'static str,
    column: &'static str,
) -> StructureSpec {
    StructureSpec {
        name,
        lane,
        structure_type,
        column,
    }
}

pub static OBJECTIVES: &[ObjectiveSpec] = &[
    objective("FireDrake", "Dragon", "Fire", "killedFireDrake"),
    objective("WaterDrake", "Dragon", "Water", "killedWaterDrake"),
    objective("AirDrake", "Dragon", "Air", "killedAirDrake"),
    objective("EarthDrake", "Dragon", "Earth", "killedEarthDrake"),
    objective("ElderDrake", "Dragon", "Elder", "killedElderDrake"),
    objective("BaronNashor", "Baron", "Epic", "killedBaronNashor"),
    objective("RiftHerald", "Herald", "Epic", "killedRiftHerald"),
];

pub static STRUCTURES: &[StructureSpec] = &[
    structure("TopInhibitor", "Top", "Inhibitor", "destroyedTopInhibitor"),
    structure("MidInhibitor", "Mid", "Inhibitor", "destroyedMidInhibitor"),
    structure("BotInhibitor", "Bot", "Inhibitor", "destroyedBotInhibitor"),
    structure("TopOuterTurret", "Top", "OuterTurret", "destroyedTopOuterTurret"),
    structure("TopInnerTurret", "Top", "InnerTurret", "destroyedTopInnerTurret"),
    structure("TopBaseTurret", "Top", "BaseTurret", "destroyedTopBaseTurret"),
    structure("TopNexusTurret", "Top", "NexusTurret", "destroyedTopNexusTurret"),
    structure("MidOuterTurret", "Mid", "OuterTurret", "destroyedMidOuterTurret"),
    structure("MidInnerTurret", "Mid", "InnerTurret", "destroyedMidInnerTurret"),
    structure("MidBaseTurret", "Mid", "BaseTurret", "destroyedMidBaseTurret"),
    structure("MidNexusTurret", "Mid", "NexusTurret", "destroyedMidNexusTurret"),
    structure("BotOuterTurret", "Bot", "OuterTurret", "destroyedBotOuterTurret"),
    structure("BotInnerTurret", "Bot", "InnerTurret", "destroyedBotInnerTurret"),
    structure("BotBaseTurret", "Bot", "BaseTurret", "destroyedBotBaseTurret"),
    structure("BotNexusTurret", "Bot", "NexusTurret", "destroyedBotNexusTurret"),
];

pub fn objective_for_column(column: &str) -> Option<&'static ObjectiveSpec> {
    OBJECTIVES.iter().find(|spec| spec.column == column)
}

pub fn structure_for_column(column: &str) -> Option<&'static StructureSpec> {
    STRUCTURES.iter().find(|spec| spec.column == column)
}
