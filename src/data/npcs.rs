//! Town NPC roster

use serde::{Deserialize, Serialize};

/// A townsperson the player can approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownNpc {
    pub id: &'static str,
    pub name: &'static str,
    pub role: &'static str,
    pub temperament: &'static str,
    /// 1-8; higher raises social DCs.
    pub aggression: i32,
    /// 1-8; higher lowers social DCs.
    pub openness: i32,
    pub faction_id: &'static str,
}

pub const TOWN_NPCS: [TownNpc; 4] = [
    TownNpc {
        id: "broker_silas",
        name: "Silas",
        role: "information broker",
        temperament: "sly",
        aggression: 3,
        openness: 6,
        faction_id: "syndicate",
    },
    TownNpc {
        id: "captain_ren",
        name: "Captain Ren",
        role: "watch captain",
        temperament: "stern",
        aggression: 6,
        openness: 3,
        faction_id: "wardens",
    },
    TownNpc {
        id: "keeper_maribel",
        name: "Maribel",
        role: "provisioner",
        temperament: "warm",
        aggression: 2,
        openness: 7,
        faction_id: "wardens",
    },
    TownNpc {
        id: "warden_oskar",
        name: "Oskar",
        role: "gate warden",
        temperament: "weary",
        aggression: 5,
        openness: 4,
        faction_id: "wild",
    },
];

pub fn find_town_npc(npc_id: &str) -> Option<&'static TownNpc> {
    TOWN_NPCS.iter().find(|row| row.id == npc_id)
}

/// Greeting shaded by temperament and current disposition.
pub fn npc_greeting(npc: &TownNpc, disposition: i32) -> String {
    let mood = if disposition >= 50 {
        "brightens as you approach"
    } else if disposition >= 10 {
        "gives you a measured nod"
    } else if disposition <= -50 {
        "glares at you openly"
    } else if disposition <= -10 {
        "watches you warily"
    } else {
        "looks you over"
    };
    match npc.temperament {
        "sly" => format!("{} {mood}, fingers drumming on the counter.", npc.name),
        "stern" => format!("{} {mood}, arms crossed.", npc.name),
        "warm" => format!("{} {mood} and wipes flour from their hands.", npc.name),
        _ => format!("{} {mood}.", npc.name),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_lookup_by_id() {
        assert!(find_town_npc("broker_silas").is_some());
        assert!(find_town_npc("nobody").is_none());
    }

    #[test]
    fn greeting_reflects_disposition() {
        let silas = find_town_npc("broker_silas").unwrap();
        assert!(npc_greeting(silas, 60).contains("brightens"));
        assert!(npc_greeting(silas, -60).contains("glares"));
    }
}
