use super::super::*;
use crate::ledger::StakeLedger;

impl<'a, S: State, E: EntropySource> Layer<'a, S, E> {
    // === Ledger Handlers ===

    pub(in crate::layer) fn handle_mint(
        &mut self,
        public: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<Vec<Event>, ApplyError> {
        let total_supply = self.mint(public, to, amount)?;
        Ok(vec![Event::Minted {
            to: to.clone(),
            amount,
            total_supply,
        }])
    }

    pub(in crate::layer) fn handle_transfer(
        &mut self,
        public: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<Vec<Event>, ApplyError> {
        self.ensure_not_custody(public)?;
        self.transfer(public, to, amount)?;
        Ok(vec![Event::Transferred {
            from: public.clone(),
            to: to.clone(),
            amount,
        }])
    }

    pub(in crate::layer) fn handle_approve(
        &mut self,
        public: &PublicKey,
        spender: &PublicKey,
        amount: u64,
    ) -> Result<Vec<Event>, ApplyError> {
        self.ensure_not_custody(public)?;
        self.approve(public, spender, amount)?;
        Ok(vec![Event::Approved {
            owner: public.clone(),
            spender: spender.clone(),
            amount,
        }])
    }
}
