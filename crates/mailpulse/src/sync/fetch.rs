//! Incremental fetch: history since a cursor, folded into per-thread changes.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::provider::{MailMessage, MailProvider, MailThread, MailboxSession, ProviderError};
use crate::retry::RetryPolicy;
use crate::sync::cursor::HistoryCursor;

/// New activity on one thread.
#[derive(Debug, Clone)]
pub struct ThreadChange {
    pub thread: MailThread,
    /// Ids reported as added in this history window.
    pub added_message_ids: Vec<String>,
}

impl ThreadChange {
    pub fn thread_id(&self) -> &str {
        &self.thread.id
    }

    pub fn latest_message(&self) -> Option<&MailMessage> {
        self.thread.latest_message()
    }

    /// Added messages that were still retrievable, in thread order.
    pub fn added_messages(&self) -> impl Iterator<Item = &MailMessage> {
        self.thread
            .messages
            .iter()
            .filter(|m| self.added_message_ids.iter().any(|id| id == &m.id))
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub changes: Vec<ThreadChange>,
    pub new_cursor: HistoryCursor,
    /// The start cursor was rejected; `new_cursor` is a fresh baseline and
    /// `changes` is empty.
    pub needs_full_resync: bool,
}

/// Provider calls are retried on rate limits and outages only; stale
/// cursors, missing threads and auth failures surface on the first answer.
pub struct FetchEngine {
    provider: Arc<dyn MailProvider>,
    mailbox_scope: String,
    concurrency: usize,
    retry: RetryPolicy,
}

impl FetchEngine {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        mailbox_scope: &str,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            mailbox_scope: mailbox_scope.to_string(),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// The provider's current cursor, for baselining new or stale accounts.
    pub async fn baseline(
        &self,
        session: &MailboxSession,
        account_id: &str,
    ) -> Result<HistoryCursor, SyncError> {
        self.retry
            .run("mail provider", ProviderError::is_transient, || {
                self.provider.current_cursor(session)
            })
            .await
            .map_err(|e| SyncError::from_provider(account_id, e))
    }

    /// Collects message-added changes after `cursor`.
    pub async fn fetch_since(
        &self,
        session: &MailboxSession,
        account_id: &str,
        cursor: HistoryCursor,
    ) -> Result<FetchOutcome, SyncError> {
        let mut new_cursor = cursor;
        let mut page_token: Option<String> = None;
        // thread id -> (first-seen order, added message ids)
        let mut threads: HashMap<String, (usize, Vec<String>)> = HashMap::new();

        loop {
            let page = match self
                .retry
                .run("mail provider", ProviderError::is_transient, || {
                    self.provider
                        .list_history(session, cursor, page_token.as_deref())
                })
                .await
            {
                Ok(page) => page,
                Err(ProviderError::CursorExpired { .. }) => {
                    let baseline = self.baseline(session, account_id).await?;
                    warn!(
                        account = %account_id,
                        stale_cursor = %cursor,
                        baseline = %baseline,
                        "history cursor expired, full resync required"
                    );
                    return Ok(FetchOutcome {
                        changes: Vec::new(),
                        new_cursor: baseline,
                        needs_full_resync: true,
                    });
                }
                Err(e) => return Err(SyncError::from_provider(account_id, e)),
            };

            new_cursor = new_cursor.max(page.cursor);
            for record in page.records {
                new_cursor = new_cursor.max(record.id);
                for added in record.added {
                    if !added.labels.iter().any(|l| l == &self.mailbox_scope) {
                        continue;
                    }
                    let order = threads.len();
                    let entry = threads
                        .entry(added.thread_id)
                        .or_insert_with(|| (order, Vec::new()));
                    if !entry.1.contains(&added.message_id) {
                        entry.1.push(added.message_id);
                    }
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        let mut pending: Vec<(String, usize, Vec<String>)> = threads
            .into_iter()
            .map(|(thread_id, (order, ids))| (thread_id, order, ids))
            .collect();
        pending.sort_by_key(|(_, order, _)| *order);

        debug!(
            account = %account_id,
            threads = pending.len(),
            "fetching changed threads"
        );

        let provider = &self.provider;
        let retry = &self.retry;
        let mut fetched: Vec<(usize, ThreadChange)> = Vec::with_capacity(pending.len());
        let mut results = stream::iter(pending)
            .map(|(thread_id, order, added_message_ids)| async move {
                let result = retry
                    .run("mail provider", ProviderError::is_transient, || {
                        provider.get_thread(session, &thread_id)
                    })
                    .await;
                (thread_id, order, added_message_ids, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((thread_id, order, added_message_ids, result)) = results.next().await {
            match result {
                Ok(thread) => {
                    let change = ThreadChange {
                        thread,
                        added_message_ids,
                    };
                    if change.added_messages().next().is_some() {
                        fetched.push((order, change));
                    } else {
                        debug!(thread = %thread_id, "added messages no longer in thread, skipping");
                    }
                }
                Err(ProviderError::NotFound(_)) => {
                    debug!(thread = %thread_id, "thread no longer retrievable, skipping");
                }
                Err(e) => return Err(SyncError::from_provider(account_id, e)),
            }
        }
        fetched.sort_by_key(|(order, _)| *order);

        info!(
            account = %account_id,
            from = %cursor,
            to = %new_cursor,
            threads = fetched.len(),
            "incremental fetch complete"
        );

        Ok(FetchOutcome {
            changes: fetched.into_iter().map(|(_, change)| change).collect(),
            new_cursor,
            needs_full_resync: false,
        })
    }
}
