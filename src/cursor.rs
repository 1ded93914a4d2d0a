//! The cursor over a query or aggregation result.
//!
//! A cursor is single-use: it is created open, drained by `next`/`to_array`,
//! and behaves as exhausted once closed. For `find` cursors the ordering
//! options are chainable before the first advance; the engine applies them
//! in the fixed order sort → skip → limit → projection no matter how the
//! calls were ordered.

use std::collections::VecDeque;

use bson::Document;

use crate::aggregate::{parse_sort, sort_documents, Projection};
use crate::coll::options::FindOptions;
use crate::db::CancellationToken;
use crate::error::{Error, Result};
use crate::filter::FilterEnv;

#[derive(Debug)]
pub struct Cursor {
    /// Matched documents pending ordering; replaced by `items` on the
    /// first advance.
    pending: Vec<Document>,
    items: VecDeque<Document>,
    sort: Option<Document>,
    skip: Option<i64>,
    limit: Option<i64>,
    projection: Option<Document>,
    batch_size: Option<i32>,
    realized: bool,
    closed: bool,
    misuse: Option<String>,
    cancel: CancellationToken,
}

impl Cursor {
    pub(crate) fn new(docs: Vec<Document>, options: FindOptions, cancel: CancellationToken) -> Cursor {
        Cursor {
            pending: docs,
            items: VecDeque::new(),
            sort: options.sort,
            skip: options.skip,
            limit: options.limit,
            projection: options.projection,
            batch_size: options.batch_size,
            realized: false,
            closed: false,
            misuse: None,
            cancel,
        }
    }

    /// Sets the sort order. Only valid before the first advance.
    pub fn sort(mut self, spec: Document) -> Cursor {
        self.apply_if_open("sort", |cursor| cursor.sort = Some(spec));
        self
    }

    /// Sets the number of documents to skip. Only valid before the first
    /// advance.
    pub fn skip(mut self, n: i64) -> Cursor {
        self.apply_if_open("skip", |cursor| cursor.skip = Some(n));
        self
    }

    /// Caps the number of documents returned. A negative `n` is applied as
    /// `|n|`: the single-batch hint collapses to an absolute limit in an
    /// embedded engine. Only valid before the first advance.
    pub fn limit(mut self, n: i64) -> Cursor {
        self.apply_if_open("limit", |cursor| cursor.limit = Some(n));
        self
    }

    /// Sets the projection. Only valid before the first advance.
    pub fn project(mut self, spec: Document) -> Cursor {
        self.apply_if_open("project", |cursor| cursor.projection = Some(spec));
        self
    }

    /// Records the caller's batching hint. The embedded engine fetches its
    /// snapshot up front, so the hint does not change observable behaviour.
    pub fn batch_size(mut self, n: i32) -> Cursor {
        self.apply_if_open("batch_size", |cursor| cursor.batch_size = Some(n));
        self
    }

    fn apply_if_open<F>(&mut self, name: &str, configure: F)
    where
        F: FnOnce(&mut Cursor),
    {
        if self.realized {
            self.misuse = Some(format!(
                "cannot call {} after the cursor has been iterated",
                name
            ));
        } else {
            configure(self);
        }
    }

    /// Applies sort → skip → limit → projection to the pending snapshot.
    fn realize(&mut self) -> Result<()> {
        if self.realized {
            return match self.misuse.take() {
                Some(message) => Err(Error::ArgumentError(message)),
                None => Ok(()),
            };
        }
        self.realized = true;
        let mut docs = std::mem::replace(&mut self.pending, Vec::new());
        if let Some(ref spec) = self.sort {
            let keys = parse_sort(spec)?;
            sort_documents(&mut docs, &keys);
        }
        let skip = self.skip.unwrap_or(0);
        if skip < 0 {
            return Err(Error::ArgumentError("skip cannot be negative".to_owned()));
        }
        if skip > 0 {
            let skip = skip as usize;
            docs = if skip >= docs.len() {
                Vec::new()
            } else {
                docs.split_off(skip)
            };
        }
        if let Some(limit) = self.limit {
            let limit = limit.checked_abs().unwrap_or(i64::max_value()) as usize;
            if limit > 0 {
                docs.truncate(limit);
            }
        }
        if let Some(ref spec) = self.projection {
            let projection = Projection::parse(spec)?;
            let env = FilterEnv::new();
            let mut projected = Vec::with_capacity(docs.len());
            for doc in &docs {
                projected.push(projection.apply(doc, &env)?);
            }
            docs = projected;
        }
        self.items = docs.into();
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Whether another document is available. Does not advance: repeated
    /// calls with no intervening `next` return the same answer.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.checkpoint()?;
        self.realize()?;
        Ok(!self.items.is_empty())
    }

    /// Drains the remainder of the cursor. A second call returns an empty
    /// vector: the cursor stays exhausted, not reset.
    pub fn to_array(&mut self) -> Result<Vec<Document>> {
        if self.closed {
            return Ok(Vec::new());
        }
        self.checkpoint()?;
        self.realize()?;
        Ok(self.items.drain(..).collect())
    }

    /// Releases the snapshot. Subsequent `next`/`has_next` report
    /// exhaustion without fault.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.items.clear();
    }

    /// The caller's batching hint, if any.
    pub fn batch_size_hint(&self) -> Option<i32> {
        self.batch_size
    }
}

impl Iterator for Cursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        if let Err(err) = self.checkpoint().and_then(|_| self.realize()) {
            self.close();
            return Some(Err(err));
        }
        self.items.pop_front().map(Ok)
    }
}
