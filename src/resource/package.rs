//! Package resources (apt, Homebrew, pip, snap)
//!
//! Mutations of one manager are serialised: apt and snap hold global locks,
//! and concurrent Homebrew installs race on shared kegs. Each manager's
//! catalogue is refreshed once per run, before whichever comes first: the
//! first upgrade check of a `latest` package, or the first mutation. A dry
//! run never refreshes, so its upgrade checks read the cached catalogue.

use converge::{CancelToken, DesiredState, Fact, NodeError, Provider, Resource, ResourceKind};
use pkgkit::{Apt, Brew, CommandRunner, PackageManager, Pip, Snap};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct ManagerSlot {
    manager: Box<dyn PackageManager>,
    /// `true` once the catalogue was refreshed, or the refresh was given up
    refreshed: Mutex<bool>,
    /// Held for the duration of a mutation, refresh included
    mutation: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Probes and converges packages through their manager
pub struct PackageProvider {
    slots: BTreeMap<ResourceKind, ManagerSlot>,
    dry_run: bool,
}

impl PackageProvider {
    /// The real managers, all sharing one runner
    pub fn system(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self::from_managers([
            (
                ResourceKind::SystemPackage,
                Box::new(Apt::new(Arc::clone(&runner)).with_timeout(timeout)) as Box<dyn PackageManager>,
            ),
            (
                ResourceKind::BrewPackage,
                Box::new(Brew::new(Arc::clone(&runner)).with_timeout(timeout)),
            ),
            (
                ResourceKind::PipPackage,
                Box::new(Pip::new(Arc::clone(&runner)).with_timeout(timeout)),
            ),
            (
                ResourceKind::SnapPackage,
                Box::new(Snap::new(runner).with_timeout(timeout)),
            ),
        ])
    }

    pub fn from_managers<I>(managers: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, Box<dyn PackageManager>)>,
    {
        let slots = managers
            .into_iter()
            .map(|(kind, manager)| {
                (
                    kind,
                    ManagerSlot {
                        manager,
                        refreshed: Mutex::new(false),
                        mutation: Mutex::new(()),
                    },
                )
            })
            .collect();
        Self {
            slots,
            dry_run: false,
        }
    }

    /// Whether the manager for `kind` mutates as root
    pub fn requires_elevation(&self, kind: ResourceKind) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| slot.manager.requires_elevation())
    }

    /// Never refresh catalogues; mutations are not expected either.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn slot(&self, kind: ResourceKind) -> Result<&ManagerSlot, NodeError> {
        self.slots
            .get(&kind)
            .ok_or_else(|| NodeError::other(format!("no package manager handles {kind}")))
    }

    /// Refresh the manager's catalogue unless this run already did.
    fn ensure_refreshed(&self, slot: &ManagerSlot, cancel: &CancelToken) -> Result<(), NodeError> {
        let manager = slot.manager.as_ref();
        let mut refreshed = lock(&slot.refreshed);
        if *refreshed {
            return Ok(());
        }
        if self.dry_run {
            log::warn!(
                "Dry run: {} upgrade checks use the cached package catalogue",
                manager.name()
            );
            *refreshed = true;
            return Ok(());
        }

        let _mutation = lock(&slot.mutation);
        // A stale catalogue can still install; only warn
        if let Err(e) = manager.refresh(cancel) {
            if cancel.is_cancelled() {
                return Err(e.into());
            }
            log::warn!("{} refresh failed: {}", manager.name(), e);
        }
        *refreshed = true;
        Ok(())
    }
}

impl Provider for PackageProvider {
    fn probe(&self, resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError> {
        let slot = self.slot(resource.kind)?;
        let manager = slot.manager.as_ref();
        let name = &resource.identifier;
        if resource.desired_state != DesiredState::Latest {
            return Ok(pkgkit::observe(manager, name, resource.desired_state, cancel)?);
        }

        // Only an installed package needs the upgrade check
        let Some(installed) = manager.current_version(name, cancel)? else {
            return Ok(Fact::Missing);
        };
        let installed = Some(installed).filter(|v| !v.is_empty());
        self.ensure_refreshed(slot, cancel)?;
        Ok(match manager.available_upgrade(name, cancel)? {
            Some(available) => Fact::Outdated {
                installed,
                available: Some(available),
            },
            None => Fact::Installed { version: installed },
        })
    }

    fn apply(&self, resource: &Resource, fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        let slot = self.slot(resource.kind)?;
        let manager = slot.manager.as_ref();
        if resource.desired_state != DesiredState::Absent {
            self.ensure_refreshed(slot, cancel)?;
        }
        let _mutation = lock(&slot.mutation);

        let name = &resource.identifier;
        let result = match (resource.desired_state, fact) {
            (DesiredState::Absent, _) => manager.uninstall(name, cancel),
            (_, Fact::Outdated { .. }) => manager.upgrade(name, cancel),
            _ => manager.install(name, cancel),
        };
        Ok(result?)
    }
}
