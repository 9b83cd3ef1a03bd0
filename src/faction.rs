//! Faction catalogue
//!
//! Factions are the departments learners join. Leaderboards aggregate by
//! faction id; this table maps ids to display names and colours.

/// Display information for a faction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactionInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub color: &'static str,
}

const FACTIONS: &[FactionInfo] = &[
    FactionInfo { id: "it_dept", name: "IT技术部", color: "blue" },
    FactionInfo { id: "im_dept", name: "信息管理部", color: "cyan" },
    FactionInfo { id: "pmo_dept", name: "项目综合管理部", color: "indigo" },
    FactionInfo { id: "dm_dept", name: "数据管理部", color: "emerald" },
    FactionInfo { id: "strategy_dept", name: "战略管理部", color: "amber" },
    FactionInfo { id: "logistics_dept", name: "物流IT部", color: "orange" },
    FactionInfo { id: "aoc_dept", name: "项目AOC", color: "rose" },
];

const UNKNOWN_FACTION: FactionInfo = FactionInfo { id: "default", name: "未知部门", color: "gray" };

/// Look up a faction, falling back to the "unknown" entry
pub fn faction_info(id: Option<&str>) -> FactionInfo {
    id.and_then(find_faction).unwrap_or(UNKNOWN_FACTION)
}

/// Find a selectable faction by id
pub fn find_faction(id: &str) -> Option<FactionInfo> {
    FACTIONS.iter().copied().find(|f| f.id == id)
}

/// All selectable factions, in display order
pub fn all_factions() -> &'static [FactionInfo] {
    FACTIONS
}
