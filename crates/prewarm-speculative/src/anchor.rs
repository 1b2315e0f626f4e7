//! Anchor snapshots and the host binding they are observed through

use serde::{Deserialize, Serialize};
use url::Url;

/// Boolean attribute that opts an anchor into speculative prefetching
pub const PREFETCH_MARKER_ATTR: &str = "data-prefetch";

/// Stable identity of an anchor element within the host document
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AnchorId(pub u64);

impl std::fmt::Display for AnchorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anchor#{}", self.0)
    }
}

/// Identity of a subtree root that anchors can be enumerated under
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ContainerId(pub u64);

impl ContainerId {
    /// The whole document
    pub const DOCUMENT: ContainerId = ContainerId(0);
}

/// Snapshot of the attributes of one anchor element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Anchor {
    /// Element identity
    pub id: AnchorId,
    /// Raw `href` attribute, unresolved
    pub href: Option<String>,
    /// Raw `target` attribute
    pub target: Option<String>,
    /// Whether a `download` attribute is present
    pub download: bool,
    /// Whether the opt-in marker is present and not `"false"`
    pub prefetch_marker: bool,
}

impl Anchor {
    /// Create an unmarked anchor pointing at `href`
    pub fn new(id: AnchorId, href: impl Into<String>) -> Self {
        Self {
            id,
            href: Some(href.into()),
            ..Default::default()
        }
    }

    /// Build from raw attribute pairs as reported by the host
    pub fn from_attributes<I, K, V>(id: AnchorId, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut anchor = Self {
            id,
            ..Default::default()
        };

        for (name, value) in attributes {
            let value: String = value.into();
            match name.as_ref().to_ascii_lowercase().as_str() {
                "href" => anchor.href = Some(value),
                "target" => anchor.target = Some(value),
                "download" => anchor.download = true,
                PREFETCH_MARKER_ATTR => {
                    anchor.prefetch_marker = !value.trim().eq_ignore_ascii_case("false")
                }
                _ => {}
            }
        }

        anchor
    }

    /// Set the opt-in marker
    pub fn with_marker(mut self) -> Self {
        self.prefetch_marker = true;
        self
    }

    /// Set the target attribute
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Mark as a download link
    pub fn with_download(mut self) -> Self {
        self.download = true;
        self
    }

    /// Whether following this anchor opens a new browsing context
    pub fn opens_new_context(&self) -> bool {
        match self.target.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(t) => !matches!(
                t.to_ascii_lowercase().as_str(),
                "_self" | "_parent" | "_top"
            ),
        }
    }
}

/// Trigger delivered by the host when an observed anchor is interacted with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Anchor entered the (margin-expanded) viewport
    Visible(AnchorId),
    /// Pointer entered the anchor
    PointerEnter(AnchorId),
    /// Pointer left the anchor
    PointerLeave(AnchorId),
    /// Anchor received keyboard focus
    Focus(AnchorId),
}

impl TriggerEvent {
    /// Anchor the event concerns
    pub fn anchor(&self) -> AnchorId {
        match self {
            TriggerEvent::Visible(id)
            | TriggerEvent::PointerEnter(id)
            | TriggerEvent::PointerLeave(id)
            | TriggerEvent::Focus(id) => *id,
        }
    }
}

/// One change reported by a tree-change notification source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeMutation {
    /// Anchor inserted into the document
    Added(Anchor),
    /// Anchor removed from the document
    Removed(AnchorId),
    /// Attributes of an anchor changed; carries the fresh snapshot
    AttributesChanged(Anchor),
    /// Markup injected under a container; every anchor below it is rescanned
    SubtreeAdded(ContainerId),
}

/// Binding to the document the anchors live in.
///
/// The manager attaches and detaches observation through this trait and
/// expects the host to report fired observers back as [`TriggerEvent`]s.
pub trait AnchorHost: Send + Sync {
    /// Start viewport observation with a margin ahead of the viewport
    fn observe_visibility(&self, anchor: AnchorId, root_margin_px: u32);

    /// Stop viewport observation of one anchor
    fn unobserve_visibility(&self, anchor: AnchorId);

    /// Disconnect the visibility observer entirely
    fn disconnect_visibility(&self);

    /// Install pointer enter/leave listeners
    fn attach_pointer(&self, anchor: AnchorId);

    /// Remove pointer enter/leave listeners
    fn detach_pointer(&self, anchor: AnchorId);

    /// Install a focus listener
    fn attach_focus(&self, anchor: AnchorId);

    /// Remove the focus listener
    fn detach_focus(&self, anchor: AnchorId);

    /// Install online/offline and reduced-motion change listeners
    fn attach_environment_listeners(&self);

    /// Remove online/offline and reduced-motion change listeners
    fn detach_environment_listeners(&self);

    /// Enumerate anchors below a container
    fn anchors_within(&self, container: ContainerId) -> Vec<Anchor>;
}

/// Document head that passive prefetch hints are written into
pub trait DocumentHead: Send + Sync {
    /// Whether an identical hint already exists
    fn has_prefetch_hint(&self, url: &Url) -> bool;

    /// Append a hint
    fn append_prefetch_hint(&self, url: &Url);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_attributes() {
        let anchor = Anchor::from_attributes(
            AnchorId(7),
            vec![
                ("href", "/docs/intro"),
                ("data-prefetch", ""),
                ("class", "nav-link"),
            ],
        );

        assert_eq!(anchor.id, AnchorId(7));
        assert_eq!(anchor.href.as_deref(), Some("/docs/intro"));
        assert!(anchor.prefetch_marker);
        assert!(!anchor.download);
    }

    #[test]
    fn test_marker_false_is_opt_out() {
        let anchor = Anchor::from_attributes(
            AnchorId(1),
            vec![("href", "/a"), ("data-prefetch", "false")],
        );
        assert!(!anchor.prefetch_marker);
    }

    #[test]
    fn test_download_attribute_without_value() {
        let anchor = Anchor::from_attributes(AnchorId(1), vec![("href", "/a.pdf"), ("download", "")]);
        assert!(anchor.download);
    }

    #[test]
    fn test_opens_new_context() {
        let anchor = Anchor::new(AnchorId(1), "/a");
        assert!(!anchor.opens_new_context());
        assert!(!anchor.clone().with_target("_self").opens_new_context());
        assert!(!anchor.clone().with_target("_TOP").opens_new_context());
        assert!(anchor.clone().with_target("_blank").opens_new_context());
        assert!(anchor.with_target("preview-pane").opens_new_context());
    }

    #[test]
    fn test_trigger_anchor() {
        assert_eq!(TriggerEvent::Focus(AnchorId(3)).anchor(), AnchorId(3));
        assert_eq!(TriggerEvent::PointerLeave(AnchorId(4)).anchor(), AnchorId(4));
    }
}
