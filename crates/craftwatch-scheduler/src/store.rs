//! In-memory job store — for tests and dry runs.
//! All state lives behind one mutex, so every accessor is atomic.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use craftwatch_core::{
    ChannelId, CraftError, JobKind, JobStore, Result, SilkStage, SilkState, SteelState, UserId,
};

#[derive(Debug, Default)]
struct Inner {
    steel: HashMap<ChannelId, SteelState>,
    silk: HashMap<ChannelId, SilkState>,
    targets: HashMap<(ChannelId, JobKind), BTreeSet<UserId>>,
}

/// Volatile `JobStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the state of every active channel out of `source`. Ticks run
    /// against the copy leave `source` untouched.
    pub fn snapshot(source: &dyn JobStore) -> Result<Self> {
        let copy = Self::new();
        for channel in source.active_channels()? {
            copy.set_steel(channel, &source.get_steel(channel)?)?;
            copy.set_silk(channel, &source.get_silk(channel)?)?;
            for kind in [JobKind::Steel, JobKind::Silk] {
                let users: Vec<UserId> = source.get_targets(channel, kind)?.into_iter().collect();
                copy.add_targets(channel, kind, &users)?;
            }
        }
        Ok(copy)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CraftError::Store("memory store lock poisoned".into()))
    }
}

impl JobStore for MemoryStore {
    fn active_channels(&self) -> Result<Vec<ChannelId>> {
        let inner = self.lock()?;
        let steel = inner
            .steel
            .iter()
            .filter(|(_, st)| st.active)
            .map(|(c, _)| *c);
        let silk = inner
            .silk
            .iter()
            .filter(|(_, st)| st.stage != SilkStage::Idle)
            .map(|(c, _)| *c);
        let channels: BTreeSet<ChannelId> = steel.chain(silk).collect();
        Ok(channels.into_iter().collect())
    }

    fn get_steel(&self, channel: ChannelId) -> Result<SteelState> {
        Ok(self.lock()?.steel.get(&channel).cloned().unwrap_or_default())
    }

    fn set_steel(&self, channel: ChannelId, state: &SteelState) -> Result<()> {
        self.lock()?.steel.insert(channel, state.clone());
        Ok(())
    }

    fn update_steel(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SteelState),
    ) -> Result<SteelState> {
        let mut inner = self.lock()?;
        let state = inner.steel.entry(channel).or_default();
        f(state);
        Ok(state.clone())
    }

    fn get_silk(&self, channel: ChannelId) -> Result<SilkState> {
        Ok(self.lock()?.silk.get(&channel).cloned().unwrap_or_default())
    }

    fn set_silk(&self, channel: ChannelId, state: &SilkState) -> Result<()> {
        self.lock()?.silk.insert(channel, state.clone());
        Ok(())
    }

    fn update_silk(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SilkState),
    ) -> Result<SilkState> {
        let mut inner = self.lock()?;
        let state = inner.silk.entry(channel).or_default();
        f(state);
        Ok(state.clone())
    }

    fn get_targets(&self, channel: ChannelId, kind: JobKind) -> Result<BTreeSet<UserId>> {
        Ok(self
            .lock()?
            .targets
            .get(&(channel, kind))
            .cloned()
            .unwrap_or_default())
    }

    fn add_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
        self.lock()?
            .targets
            .entry((channel, kind))
            .or_default()
            .extend(users.iter().copied());
        Ok(())
    }

    fn remove_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(set) = inner.targets.get_mut(&(channel, kind)) {
            for user in users {
                set.remove(user);
            }
        }
        Ok(())
    }
}
