//! Client identities and the process-wide ban list.
//!
//! [`BanList`] is read on every new connection and replaced wholesale when
//! the external ban store reports a change.

use std::{
    collections::HashSet,
    net::IpAddr,
    path::Path,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identity of a connected client, resolved once per session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Remote address the connection came from.
    pub ip: IpAddr,
    /// Whether the address was banned when the session started.
    pub banned: bool,
}

impl Identity {
    /// Identity of an address that is not banned.
    #[must_use]
    pub fn new(ip: IpAddr) -> Self { Self { ip, banned: false } }

    /// Identity of a banned address.
    #[must_use]
    pub fn banned(ip: IpAddr) -> Self { Self { ip, banned: true } }
}

/// Looks up the identity of a remote address.
pub trait IdentityResolver: Send + Sync + 'static {
    /// Resolve the identity of `ip`.
    fn resolve(&self, ip: IpAddr) -> Identity;
}

/// A ban of one address from one board.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ban {
    /// Banned address.
    pub ip: IpAddr,
    /// Board the ban applies to.
    pub board: String,
}

/// Errors raised while loading bans.
#[derive(Debug, Error)]
pub enum BanListError {
    /// The ban file could not be read.
    #[error("failed to read ban file: {0}")]
    Io(#[from] std::io::Error),
    /// The ban file is not a JSON list of bans.
    #[error("failed to parse ban file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-mostly set of active bans.
#[derive(Debug, Default)]
pub struct BanList {
    bans: RwLock<HashSet<Ban>>,
}

impl BanList {
    /// Create a ban list holding `bans`.
    #[must_use]
    pub fn new(bans: impl IntoIterator<Item = Ban>) -> Self {
        Self {
            bans: RwLock::new(bans.into_iter().collect()),
        }
    }

    /// Replace every ban with `bans`.
    ///
    /// Returns the addresses that were not banned anywhere before, so live
    /// sessions from them can be disconnected.
    pub fn replace(&self, bans: impl IntoIterator<Item = Ban>) -> Vec<IpAddr> {
        let next: HashSet<Ban> = bans.into_iter().collect();
        let mut guard = self.bans.write().unwrap_or_else(PoisonError::into_inner);
        let before: HashSet<IpAddr> = guard.iter().map(|ban| ban.ip).collect();
        let mut added: Vec<IpAddr> = next
            .iter()
            .map(|ban| ban.ip)
            .filter(|ip| !before.contains(ip))
            .collect();
        added.sort_unstable();
        added.dedup();
        *guard = next;
        debug!(bans = guard.len(), newly_banned = added.len(), "ban list replaced");
        added
    }

    /// Whether `ip` is banned from any board.
    #[must_use]
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.bans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|ban| ban.ip == ip)
    }

    /// Whether `ip` is banned from `board`.
    #[must_use]
    pub fn is_banned_on(&self, ip: IpAddr, board: &str) -> bool {
        self.bans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|ban| ban.ip == ip && ban.board == board)
    }

    /// Number of bans held.
    #[must_use]
    pub fn len(&self) -> usize { self.bans.read().unwrap_or_else(PoisonError::into_inner).len() }

    /// Whether no bans are held.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Apply every ban set received from `updates` until the sender is dropped.
    ///
    /// `on_banned` runs for each address that becomes banned.
    pub async fn listen(
        &self,
        mut updates: mpsc::Receiver<Vec<Ban>>,
        mut on_banned: impl FnMut(IpAddr) + Send,
    ) {
        while let Some(bans) = updates.recv().await {
            for ip in self.replace(bans) {
                on_banned(ip);
            }
        }
        info!("ban update feed closed");
    }

    /// Read a JSON list of bans from `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`BanListError`] if the file cannot be read or parsed.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<Ban>, BanListError> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl IdentityResolver for BanList {
    fn resolve(&self, ip: IpAddr) -> Identity {
        Identity {
            ip,
            banned: self.is_banned(ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rstest::{fixture, rstest};

    use super::*;

    fn ip(last: u8) -> IpAddr { IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)) }

    fn ban(last: u8, board: &str) -> Ban {
        Ban {
            ip: ip(last),
            board: board.into(),
        }
    }

    #[fixture]
    fn bans() -> BanList { BanList::new([ban(1, "a"), ban(2, "b")]) }

    #[rstest]
    fn resolves_ban_status(bans: BanList) {
        assert_eq!(bans.resolve(ip(1)), Identity::banned(ip(1)));
        assert_eq!(bans.resolve(ip(3)), Identity::new(ip(3)));
    }

    #[rstest]
    fn board_scoped_lookup(bans: BanList) {
        assert!(bans.is_banned_on(ip(1), "a"));
        assert!(!bans.is_banned_on(ip(1), "b"));
    }

    #[rstest]
    fn replace_reports_new_addresses_only(bans: BanList) {
        let added = bans.replace([ban(2, "c"), ban(3, "a"), ban(3, "b")]);
        assert_eq!(added, vec![ip(3)]);
        assert!(!bans.is_banned(ip(1)));
        assert_eq!(bans.len(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn listen_applies_updates_in_order(bans: BanList) {
        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![ban(5, "a")]).await.expect("send update");
        tx.send(vec![ban(5, "a"), ban(6, "a")]).await.expect("send update");
        drop(tx);

        let mut seen = Vec::new();
        bans.listen(rx, |ip| seen.push(ip)).await;
        assert_eq!(seen, vec![ip(5), ip(6)]);
        assert!(bans.is_banned(ip(6)));
        assert!(!bans.is_banned(ip(1)));
    }

    #[test]
    fn bans_parse_from_json() {
        let parsed: Vec<Ban> =
            serde_json::from_str(r#"[{"ip":"10.0.0.1","board":"a"}]"#).expect("parse bans");
        assert_eq!(parsed, vec![ban(1, "a")]);
    }
}
