//! Priority ordering of pluggable components.

use std::sync::Arc;

use tracing::debug;

use quarry_types::Session;

/// Inverts the priority comparator to pure insertion order.
pub const CONFIG_USE_INSERTION_ORDER: &str = "quarry.priority.useInsertionOrder";
/// Per-component priority override: `quarry.priority.<name>`. `nan` disables
/// the component.
pub const CONFIG_PRIORITY_PREFIX: &str = "quarry.priority.";

struct Entry<T: ?Sized> {
    component: Arc<T>,
    priority: f32,
    index: usize,
}

/// A component list partitioned into enabled (finite priority) and disabled
/// (NaN priority), the enabled part sorted by descending priority with
/// insertion order as the tie breaker.
pub struct PrioritizedComponents<T: ?Sized> {
    enabled: Vec<Entry<T>>,
    disabled: usize,
}

impl<T: ?Sized> PrioritizedComponents<T> {
    /// Orders `components`, applying the session's priority overrides. The
    /// `name` and `priority` accessors come from the component trait.
    pub fn new<'a>(
        session: &Session,
        components: impl IntoIterator<Item = &'a Arc<T>>,
        name: impl Fn(&T) -> &str,
        priority: impl Fn(&T) -> f32,
    ) -> Self
    where
        T: 'a,
    {
        let insertion_order = session.config().get_bool(CONFIG_USE_INSERTION_ORDER, false);

        let mut enabled = Vec::new();
        let mut disabled = 0usize;
        for (index, component) in components.into_iter().enumerate() {
            let component_name = name(component).to_string();
            let effective = session
                .config()
                .get_f32(&format!("{CONFIG_PRIORITY_PREFIX}{component_name}"))
                .unwrap_or_else(|| priority(component));
            if effective.is_nan() {
                debug!("component {component_name} disabled by priority override");
                disabled += 1;
                continue;
            }
            enabled.push(Entry {
                component: Arc::clone(component),
                priority: if insertion_order { 0.0 } else { effective },
                index,
            });
        }

        if !insertion_order {
            enabled.sort_by(|a, b| {
                b.priority
                    .partial_cmp(&a.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.index.cmp(&b.index))
            });
        }

        Self { enabled, disabled }
    }

    /// Enabled components, highest priority first.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<T>> {
        self.enabled.iter().map(|entry| &entry.component)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn disabled_count(&self) -> usize {
        self.disabled
    }
}

/// Session-cached ordering. The cache key mixes in a digest of the component
/// names so dynamically grown component sets get their own ordering.
pub fn cached<T: ?Sized + Send + Sync + 'static>(
    session: &Session,
    kind: &str,
    components: &[Arc<T>],
    name: impl Fn(&T) -> &str,
    priority: impl Fn(&T) -> f32,
) -> Arc<PrioritizedComponents<T>> {
    let mut identity = String::new();
    for component in components {
        identity.push_str(name(component));
        identity.push('\n');
    }
    let key = format!("quarry.prioritized.{kind}.{:016x}", seahash::hash(identity.as_bytes()));
    session
        .data()
        .compute_if_absent(&key, || PrioritizedComponents::new(session, components, name, priority))
}
