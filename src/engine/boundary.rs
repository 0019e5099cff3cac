//! Album completion at fetch-window edges.
//!
//! Pages are cut by item count, so the oldest and newest albums in a fetched set
//! may be missing members that sit just outside it. Albums are at most
//! `boundary_window` items long, so one small query on each side is enough to
//! recover them. Albums strictly inside the set are complete by construction.

use crate::config::PacingWindow;
use crate::error::{Error, Result};
use crate::source::{MessageQuery, SourceClient, SourceResult};
use crate::types::RawItem;
use tokio_util::sync::CancellationToken;

use super::progress::pace;

/// Items recovered by [`BoundaryResolver::resolve`] plus the lookups that failed
#[derive(Debug, Default)]
pub(crate) struct BoundaryOutcome {
    pub(crate) items: Vec<RawItem>,
    pub(crate) failures: Vec<String>,
}

/// Album edges of a fetched item set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Edges {
    first_group: i64,
    first_min: i64,
    /// Group and largest id of the newest album, when it differs from the oldest
    last: Option<(i64, i64)>,
}

fn edges(items: &[RawItem]) -> Option<Edges> {
    let mut grouped: Vec<(i64, i64)> = items
        .iter()
        .filter_map(|i| i.group_id.map(|g| (i.id, g)))
        .collect();
    grouped.sort_unstable();

    let &(_, first_group) = grouped.first()?;
    let &(_, last_group) = grouped.last()?;

    let first_min = grouped
        .iter()
        .filter(|(_, g)| *g == first_group)
        .map(|(id, _)| *id)
        .min()?;
    let last = if last_group != first_group {
        grouped
            .iter()
            .filter(|(_, g)| *g == last_group)
            .map(|(id, _)| *id)
            .max()
            .map(|max| (last_group, max))
    } else {
        None
    };

    Some(Edges {
        first_group,
        first_min,
        last,
    })
}

/// Recovers album members cut off by page edges
pub(crate) struct BoundaryResolver<'a> {
    pub(crate) client: &'a dyn SourceClient,
    pub(crate) window: i64,
    pub(crate) delay: PacingWindow,
    pub(crate) cancel: &'a CancellationToken,
}

impl BoundaryResolver<'_> {
    /// Siblings of the oldest and newest albums in `fetched` that lie outside it
    ///
    /// Lookup failures are reported in [`BoundaryOutcome::failures`]; only
    /// cancellation is returned as an error.
    pub(crate) async fn resolve(&self, source_id: &str, fetched: &[RawItem]) -> Result<BoundaryOutcome> {
        let mut outcome = BoundaryOutcome::default();
        let Some(edges) = edges(fetched) else {
            return Ok(outcome);
        };
        let limit = self.window.max(1) as usize;

        tracing::debug!(
            source_id,
            first_group = edges.first_group,
            first_min = edges.first_min,
            last = ?edges.last,
            "Checking album boundaries"
        );

        let before = MessageQuery::between((edges.first_min - self.window).max(0), edges.first_min, limit);
        match self.lookup(source_id, before).await? {
            Ok(items) => outcome.items.extend(items.into_iter().filter(|i| {
                i.group_id == Some(edges.first_group) && i.id < edges.first_min
            })),
            Err(e) => {
                tracing::warn!(source_id, group_id = edges.first_group, error = %e, "Album look-behind failed");
                outcome
                    .failures
                    .push(format!("album {} look-behind failed: {}", edges.first_group, e));
            }
        }

        if let Some((last_group, last_max)) = edges.last {
            pace(self.delay, self.cancel).await?;

            let after = MessageQuery::between(last_max, last_max + self.window, limit);
            match self.lookup(source_id, after).await? {
                Ok(items) => outcome.items.extend(
                    items
                        .into_iter()
                        .filter(|i| i.group_id == Some(last_group) && i.id > last_max),
                ),
                Err(e) => {
                    tracing::warn!(source_id, group_id = last_group, error = %e, "Album look-ahead failed");
                    outcome
                        .failures
                        .push(format!("album {} look-ahead failed: {}", last_group, e));
                }
            }
        }

        if !outcome.items.is_empty() {
            tracing::info!(source_id, recovered = outcome.items.len(), "Recovered album members");
        }
        Ok(outcome)
    }

    /// One look-around query; cancellation wins over a pending response
    async fn lookup(&self, source_id: &str, query: MessageQuery) -> Result<SourceResult<Vec<RawItem>>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.client.get_messages(source_id, query) => Ok(result),
        }
    }
}
