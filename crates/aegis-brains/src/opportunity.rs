//! Opportunity awareness: keeps a per-symbol note of how interesting the
//! market currently looks, for operators and reports.

use aegis_core::{MarketMode, Opportunity};
use aegis_state::SystemStateHandle;

#[derive(Debug, Clone, Default)]
pub struct OpportunityAwareness;

impl OpportunityAwareness {
    pub fn new() -> Self {
        Self
    }

    /// Record the scored view of one symbol for this cycle.
    pub fn observe(
        &self,
        state: &SystemStateHandle,
        symbol: &str,
        score: u32,
        mode: MarketMode,
    ) -> Opportunity {
        let note = match mode {
            MarketMode::Trade => "high-quality setup".to_string(),
            MarketMode::Observe => "worth watching".to_string(),
            MarketMode::Caution => "low quality, caution".to_string(),
            MarketMode::Stop => "no setup".to_string(),
        };

        let opportunity = Opportunity {
            symbol: symbol.to_string(),
            score,
            note,
        };
        state.update_opportunity(opportunity.clone());
        opportunity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_updates_state() {
        let state = SystemStateHandle::new();
        let awareness = OpportunityAwareness::new();

        awareness.observe(&state, "BTCUSDT", 95, MarketMode::Trade);
        awareness.observe(&state, "ETHUSDT", 40, MarketMode::Stop);

        let opportunities = state.opportunities();
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities["BTCUSDT"].score, 95);
        assert!(opportunities["ETHUSDT"].note.contains("no setup"));
    }
}
