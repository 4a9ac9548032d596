//! Splitting one logical payload into per-channel sub-payloads.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::job::Payload;

/// Payload of a logical multi-channel job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiPayload {
    /// Same payload for every channel.
    Broadcast(Payload),
    /// Explicit payload per channel name; channels not named get no sub-job.
    PerChannel(BTreeMap<String, Payload>),
}

impl From<Payload> for MultiPayload {
    fn from(p: Payload) -> Self {
        MultiPayload::Broadcast(p)
    }
}

impl From<&str> for MultiPayload {
    fn from(s: &str) -> Self {
        MultiPayload::Broadcast(Payload::from(s))
    }
}

impl From<String> for MultiPayload {
    fn from(s: String) -> Self {
        MultiPayload::Broadcast(Payload::from(s))
    }
}

impl From<BTreeMap<String, Payload>> for MultiPayload {
    fn from(map: BTreeMap<String, Payload>) -> Self {
        MultiPayload::PerChannel(map)
    }
}

pub type DispatchFn = Rc<dyn Fn(&MultiPayload, &[String]) -> Result<BTreeMap<String, Payload>>>;

/// Replicate a broadcast to every channel; pass a per-channel map through.
pub fn default_dispatch(
    payload: &MultiPayload,
    channels: &[String],
) -> Result<BTreeMap<String, Payload>> {
    match payload {
        MultiPayload::Broadcast(p) => Ok(channels
            .iter()
            .map(|name| (name.clone(), p.clone()))
            .collect()),
        MultiPayload::PerChannel(map) => Ok(map.clone()),
    }
}

/// Reject sub-payloads for channels that do not exist, and empty splits.
pub(super) fn check_split(split: &BTreeMap<String, Payload>, channels: &[String]) -> Result<()> {
    if let Some(name) = split.keys().find(|k| !channels.contains(k)) {
        return Err(Error::UnknownChannel(name.clone()));
    }
    if split.is_empty() {
        return Err(Error::InvalidJobData("dispatch produced no sub-jobs".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn broadcast_reaches_every_channel() {
        let split = default_dispatch(&"q".into(), &names()).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split["a"], Payload::from("q"));
        assert_eq!(split["b"], Payload::from("q"));
    }

    #[test]
    fn per_channel_map_passes_through() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Payload::from("only-b"));
        let split = default_dispatch(&map.into(), &names()).unwrap();
        assert_eq!(split.keys().collect::<Vec<_>>(), vec!["b"]);
        check_split(&split, &names()).unwrap();
    }

    #[test]
    fn unknown_and_empty_splits_are_rejected() {
        let mut map = BTreeMap::new();
        map.insert("z".to_string(), Payload::from("x"));
        assert!(matches!(
            check_split(&map, &names()),
            Err(Error::UnknownChannel(ref n)) if n == "z"
        ));
        assert!(matches!(
            check_split(&BTreeMap::new(), &names()),
            Err(Error::InvalidJobData(_))
        ));
    }
}
