//! Lazy query over one collection

use crate::collection::Collection;
use crate::document::SharedDocument;
use crate::expression::Expression;
use crate::options::{FindOptions, ReadPreference};
use async_stream::try_stream;
use bson::{Bson, Document as BsonDocument};
use futures::Stream;
use mnemosyne_common::{MnemosyneError, Result};
use std::fmt;

/// Forward infallible `where_*` builders to the inner expression
macro_rules! forward_where {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            pub fn $name(&mut self, $($arg: $ty),*) -> &mut Self {
                self.expression.$name($($arg),*);
                self
            }
        )*
    };
}

/// Forward fallible `where_*` builders to the inner expression
macro_rules! forward_where_checked {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            pub fn $name(&mut self, $($arg: $ty),*) -> Result<&mut Self> {
                self.expression.$name($($arg),*)?;
                Ok(self)
            }
        )*
    };
}

/// Filter plus result shaping.
///
/// Nothing is read until [`stream`](Cursor::stream), [`to_vec`](Cursor::to_vec)
/// or [`find_one`](Cursor::find_one) is called. Every call issues a fresh
/// read, so changes made between passes are visible.
#[derive(Clone)]
pub struct Cursor {
    collection: Collection,
    expression: Expression,
    sort: Option<BsonDocument>,
    skip: u64,
    limit: i64,
    projection: Option<BsonDocument>,
    read_preference: Option<ReadPreference>,
}

impl Cursor {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            expression: Expression::new(),
            sort: None,
            skip: 0,
            limit: 0,
            projection: None,
            read_preference: None,
        }
    }

    forward_where! {
        where_eq(path: &str, value: impl Into<Bson>);
        where_not_equal(path: &str, value: impl Into<Bson>);
        where_exists(path: &str);
        where_not_exists(path: &str);
        where_null(path: &str);
        where_type(path: &str, bson_type: impl Into<Bson>);
        where_like(path: &str, pattern: &str, case_insensitive: bool);
        where_regex(path: &str, pattern: &str, options: &str);
        where_elem_match(path: &str, criteria: &Expression);
        where_array_size(path: &str, size: usize);
        where_mod(path: &str, divisor: i64, remainder: i64);
    }

    forward_where_checked! {
        where_greater(path: &str, value: impl Into<Bson>);
        where_greater_or_equal(path: &str, value: impl Into<Bson>);
        where_less(path: &str, value: impl Into<Bson>);
        where_less_or_equal(path: &str, value: impl Into<Bson>);
    }

    pub fn where_in<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.expression.where_in(path, values);
        self
    }

    pub fn where_not_in<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.expression.where_not_in(path, values);
        self
    }

    pub fn where_all<I, V>(&mut self, path: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.expression.where_all(path, values);
        self
    }

    pub fn where_elem_match_with<F>(&mut self, path: &str, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        self.expression.where_elem_match_with(path, build)?;
        Ok(self)
    }

    pub fn where_or<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.expression.where_or(expressions);
        self
    }

    pub fn where_and<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.expression.where_and(expressions);
        self
    }

    pub fn where_nor<I: IntoIterator<Item = Expression>>(&mut self, expressions: I) -> &mut Self {
        self.expression.where_nor(expressions);
        self
    }

    pub fn where_or_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        self.expression.where_or_with(build)?;
        Ok(self)
    }

    pub fn where_and_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        self.expression.where_and_with(build)?;
        Ok(self)
    }

    pub fn where_nor_with<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Expression) -> Result<()>,
    {
        self.expression.where_nor_with(build)?;
        Ok(self)
    }

    /// Merge a pre-built expression into the filter
    pub fn query(&mut self, expression: &Expression) -> &mut Self {
        self.expression.merge(expression);
        self
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Replace the sort specification
    pub fn sort(&mut self, spec: BsonDocument) -> &mut Self {
        self.sort = Some(spec);
        self
    }

    /// Append one sort key
    pub fn sort_by(&mut self, path: &str, ascending: bool) -> &mut Self {
        self.sort
            .get_or_insert_with(BsonDocument::new)
            .insert(path, if ascending { 1 } else { -1 });
        self
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.skip = skip;
        self
    }

    /// Cap the number of results; 0 removes the cap
    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = limit;
        self
    }

    /// Return only the listed paths (plus `_id`)
    pub fn fields<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let projection = self.projection.get_or_insert_with(BsonDocument::new);
        for path in paths {
            projection.insert(path.as_ref(), 1);
        }
        self
    }

    /// Return everything except the listed paths
    pub fn skip_fields<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let projection = self.projection.get_or_insert_with(BsonDocument::new);
        for path in paths {
            projection.insert(path.as_ref(), 0);
        }
        self
    }

    /// Replace the projection
    pub fn projection(&mut self, projection: BsonDocument) -> &mut Self {
        self.projection = Some(projection);
        self
    }

    /// Read preference for this cursor only
    pub fn read_preference(&mut self, preference: ReadPreference) -> &mut Self {
        self.read_preference = Some(preference);
        self
    }

    fn options(&self) -> FindOptions {
        FindOptions {
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
            projection: self.projection.clone(),
            read_preference: self
                .read_preference
                .clone()
                .unwrap_or_else(|| self.collection.read_preference()),
        }
    }

    /// Projected reads are partial records and never enter the pool
    fn poolable(&self) -> bool {
        self.projection.is_none()
    }

    /// Issue the read and yield hydrated documents.
    ///
    /// Each call to `stream` issues its own read.
    pub fn stream(&self) -> impl Stream<Item = Result<SharedDocument>> + Send + '_ {
        try_stream! {
            let records = self
                .collection
                .fetch(self.expression.to_document(), self.options())
                .await?;
            for raw in records {
                yield self.collection.hydrate(raw, self.poolable());
            }
        }
    }

    pub async fn to_vec(&self) -> Result<Vec<SharedDocument>> {
        let records = self
            .collection
            .fetch(self.expression.to_document(), self.options())
            .await?;
        Ok(records
            .into_iter()
            .map(|raw| self.collection.hydrate(raw, self.poolable()))
            .collect())
    }

    /// Raw records, bypassing hydration and the pool
    pub async fn to_documents(&self) -> Result<Vec<BsonDocument>> {
        self.collection
            .fetch(self.expression.to_document(), self.options())
            .await
    }

    /// First matching document, or `None`
    pub async fn find_one(&self) -> Result<Option<SharedDocument>> {
        let options = FindOptions {
            limit: 1,
            ..self.options()
        };
        let mut records = self
            .collection
            .fetch(self.expression.to_document(), options)
            .await?;
        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.collection.hydrate(records.swap_remove(0), self.poolable())))
    }

    /// Count matches, ignoring skip and limit
    pub async fn count(&self) -> Result<u64> {
        let options = self.options();
        self.collection
            .count_with(self.expression.to_document(), 0, 0, &options.read_preference)
            .await
    }

    /// Count matches with skip and limit applied
    pub async fn count_applying_limits(&self) -> Result<u64> {
        if self.limit < 0 {
            return Err(MnemosyneError::InvalidArgument(
                "limit must not be negative when counting".to_string(),
            ));
        }
        let options = self.options();
        self.collection
            .count_with(
                self.expression.to_document(),
                options.skip,
                options.limit,
                &options.read_preference,
            )
            .await
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", self.collection.namespace())
            .field("filter", &self.expression.to_document())
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("projection", &self.projection)
            .finish()
    }
}
