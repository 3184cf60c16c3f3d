use crate::container::{Container, ContainerID, Observation, Snapshot};
use crate::event::{Event, EventType};
use crate::stats::Stat;

/// Everything one reconciliation cycle has to do, computed without I/O.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Inventory entries no longer reported by the probe.
    pub removed: Vec<Container>,
    /// `started`/`stopped` events for running-flag flips between the two snapshots.
    pub transitions: Vec<Event>,
    /// Containers reported for the first time.
    pub created: Vec<Container>,
    /// One sample per container in the current snapshot.
    pub stats: Vec<Stat>,
}

#[cfg(test)]
impl Plan {
    /// All events the plan produces if every mutation succeeds, in dispatch order.
    fn events(&self) -> Vec<Event> {
        self.removed
            .iter()
            .map(removed_event)
            .chain(self.transitions.iter().cloned())
            .chain(self.created.iter().map(created_event))
            .collect()
    }

    fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.transitions.is_empty() && self.created.is_empty()
    }
}

pub fn removed_event(container: &Container) -> Event {
    Event::lifecycle(
        EventType::Removed,
        &container.probe,
        &container.hostname,
        &container.id,
        "",
    )
}

pub fn created_event(container: &Container) -> Event {
    Event::lifecycle(
        EventType::Created,
        &container.probe,
        &container.hostname,
        &container.id,
        container.image.clone(),
    )
}

/// Diffs `current` against `previous` and the persisted `inventory` of `probe`.
///
/// Removal is inferred only from absence in `current`. Start/stop is only
/// detected between the two snapshots given, so a container that stops and
/// starts again within one poll interval produces no event.
pub fn plan(probe: &str, previous: &Snapshot, current: &Snapshot, inventory: &[Container]) -> Plan {
    let mut observed: Vec<(&ContainerID, &Observation)> = current.iter().collect();
    observed.sort_by(|a, b| a.0.cmp(b.0));

    let removed = inventory
        .iter()
        .filter(|c| !current.contains(c.id.as_ref()))
        .cloned()
        .collect();

    let transitions = observed
        .iter()
        .filter_map(|(id, now)| {
            let before = previous.get(id.as_ref())?;
            let kind = match (before.running, now.running) {
                (false, true) => EventType::Started,
                (true, false) => EventType::Stopped,
                _ => return None,
            };
            Some(Event::lifecycle(kind, probe, &now.hostname, id, ""))
        })
        .collect();

    let created = observed
        .iter()
        .filter(|(id, _)| !inventory.iter().any(|c| &c.id == *id))
        .map(|(id, obs)| Container::from_observation(probe, (*id).clone(), obs))
        .collect();

    let stats = observed
        .iter()
        .map(|(id, obs)| Stat::from_observation((*id).clone(), obs))
        .collect();

    Plan {
        removed,
        transitions,
        created,
        stats,
    }
}
