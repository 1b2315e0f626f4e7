//! Link eligibility: may this anchor ever be speculatively fetched?
//!
//! Pure and allocation-light. The manager re-runs it on every attribute
//! mutation, so it must stay free of side effects.

use crate::Anchor;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Caller-supplied veto; returning `false` rejects the anchor
pub type AnchorPredicate = Arc<dyn Fn(&Anchor) -> bool + Send + Sync>;

/// Why an anchor was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No `href`, or an empty one
    MissingHref,
    /// Points only at a fragment of the current document
    SameDocumentFragment,
    /// Carries a `download` attribute
    Download,
    /// Opens a new browsing context
    NewBrowsingContext,
    /// Destination could not be parsed
    InvalidUrl,
    /// Scheme other than http/https
    UnsupportedProtocol,
    /// Destination on another origin
    CrossOrigin,
    /// Custom predicate said no
    Vetoed,
}

impl RejectReason {
    /// Stable human-readable reason
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingHref => "missing href",
            RejectReason::SameDocumentFragment => "same-document fragment",
            RejectReason::Download => "download link",
            RejectReason::NewBrowsingContext => "opens new browsing context",
            RejectReason::InvalidUrl => "invalid url",
            RejectReason::UnsupportedProtocol => "unsupported protocol",
            RejectReason::CrossOrigin => "cross-origin destination",
            RejectReason::Vetoed => "vetoed by custom predicate",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy inputs for [`evaluate`]
#[derive(Clone)]
pub struct EligibilityOptions {
    /// URL of the current document; used as the base when no origin is configured
    pub document_url: Url,
    /// Explicitly configured origin, overriding the document's
    pub configured_origin: Option<Url>,
    /// Optional custom veto
    pub predicate: Option<AnchorPredicate>,
}

impl EligibilityOptions {
    /// Options for a document with no configured origin and no predicate
    pub fn new(document_url: Url) -> Self {
        Self {
            document_url,
            configured_origin: None,
            predicate: None,
        }
    }

    /// Override the origin
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.configured_origin = Some(origin);
        self
    }

    /// Install a custom veto
    pub fn with_predicate(mut self, predicate: AnchorPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Base URL hrefs are resolved against
    pub fn base(&self) -> &Url {
        self.configured_origin.as_ref().unwrap_or(&self.document_url)
    }
}

impl fmt::Debug for EligibilityOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibilityOptions")
            .field("document_url", &self.document_url.as_str())
            .field("configured_origin", &self.configured_origin.as_ref().map(Url::as_str))
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Outcome of [`evaluate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityResult {
    /// Whether the anchor may be prefetched
    pub eligible: bool,
    /// Why not, when ineligible
    pub reason: Option<RejectReason>,
    /// Absolute destination, when eligible
    pub url: Option<Url>,
}

impl EligibilityResult {
    fn accept(url: Url) -> Self {
        Self {
            eligible: true,
            reason: None,
            url: Some(url),
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
            url: None,
        }
    }
}

/// Decide whether an anchor is safe to speculatively fetch
pub fn evaluate(anchor: &Anchor, options: &EligibilityOptions) -> EligibilityResult {
    let href = match anchor.href.as_deref().map(str::trim) {
        Some(href) if !href.is_empty() => href,
        _ => return EligibilityResult::reject(RejectReason::MissingHref),
    };

    if href.starts_with('#') {
        return EligibilityResult::reject(RejectReason::SameDocumentFragment);
    }

    if anchor.download {
        return EligibilityResult::reject(RejectReason::Download);
    }

    if anchor.opens_new_context() {
        return EligibilityResult::reject(RejectReason::NewBrowsingContext);
    }

    let base = options.base();
    let url = match base.join(href) {
        Ok(url) => url,
        Err(_) => return EligibilityResult::reject(RejectReason::InvalidUrl),
    };

    if !matches!(url.scheme(), "http" | "https") {
        return EligibilityResult::reject(RejectReason::UnsupportedProtocol);
    }

    if url.origin() != base.origin() {
        return EligibilityResult::reject(RejectReason::CrossOrigin);
    }

    if let Some(predicate) = &options.predicate {
        if !predicate(anchor) {
            return EligibilityResult::reject(RejectReason::Vetoed);
        }
    }

    EligibilityResult::accept(url)
}
