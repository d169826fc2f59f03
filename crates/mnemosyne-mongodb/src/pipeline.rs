//! Aggregation pipeline builder
//!
//! Stages are kept in call order; nothing is reordered or merged.

use crate::collection::Collection;
use crate::expression::Expression;
use bson::{doc, Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result};
use std::fmt;

const WRONG_PIPELINES: &str = "wrong pipelines specified";

#[derive(Clone, Default)]
pub struct Pipeline {
    collection: Option<Collection>,
    stages: Vec<BsonDocument>,
}

impl Pipeline {
    /// A detached pipeline; submit it with [`Collection::aggregate`]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bound(collection: Collection) -> Self {
        Self {
            collection: Some(collection),
            stages: Vec::new(),
        }
    }

    fn push(&mut self, operator: &str, body: impl Into<Bson>) -> &mut Self {
        let mut stage = BsonDocument::new();
        stage.insert(operator, body.into());
        self.stages.push(stage);
        self
    }

    /// `$match` on a raw filter document
    pub fn match_filter(&mut self, filter: BsonDocument) -> &mut Self {
        self.push("$match", filter)
    }

    pub fn match_expression(&mut self, expression: &Expression) -> &mut Self {
        self.push("$match", expression.to_document())
    }

    /// `$group`; the body must carry an `_id` key
    pub fn group(&mut self, body: BsonDocument) -> Result<&mut Self> {
        if !body.contains_key("_id") {
            return Err(MnemosyneError::InvalidArgument(
                "group stage requires _id".to_string(),
            ));
        }
        Ok(self.push("$group", body))
    }

    pub fn project(&mut self, body: BsonDocument) -> &mut Self {
        self.push("$project", body)
    }

    pub fn sort(&mut self, spec: BsonDocument) -> &mut Self {
        self.push("$sort", spec)
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.push("$limit", limit)
    }

    pub fn skip(&mut self, skip: i64) -> &mut Self {
        self.push("$skip", skip)
    }

    /// `$unwind`; a bare field name gets its `$` prefix
    pub fn unwind(&mut self, path: &str) -> &mut Self {
        let path = if path.starts_with('$') {
            path.to_string()
        } else {
            format!("${}", path)
        };
        self.push("$unwind", path)
    }

    pub fn lookup(
        &mut self,
        from: &str,
        local_field: &str,
        foreign_field: &str,
        output: &str,
    ) -> &mut Self {
        self.push(
            "$lookup",
            doc! {
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": output,
            },
        )
    }

    pub fn add_fields(&mut self, fields: BsonDocument) -> &mut Self {
        self.push("$addFields", fields)
    }

    /// `$count` into `field`
    pub fn count(&mut self, field: &str) -> &mut Self {
        self.push("$count", field)
    }

    /// Append a raw stage; it must be a single `$`-prefixed key
    pub fn add_stage(&mut self, stage: BsonDocument) -> Result<&mut Self> {
        check_stage(&stage)?;
        self.stages.push(stage);
        Ok(self)
    }

    pub fn stages(&self) -> &[BsonDocument] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<BsonDocument> {
        self.stages.clone()
    }

    fn collection(&self) -> Result<&Collection> {
        self.collection.as_ref().ok_or_else(|| {
            MnemosyneError::Configuration("pipeline is not bound to a collection".to_string())
        })
    }

    /// Submit the stages and return the result rows
    pub async fn aggregate(&self) -> Result<Vec<BsonDocument>> {
        self.collection()?.aggregate(self).await
    }

    /// Submit the stages wrapped in an explain request
    pub async fn explain(&self) -> Result<BsonDocument> {
        self.collection()?.explain_aggregate(self).await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("collection", &self.collection.as_ref().map(Collection::namespace))
            .field("stages", &self.stages)
            .finish()
    }
}

fn check_stage(stage: &BsonDocument) -> Result<()> {
    let mut keys = stage.keys();
    match (keys.next(), keys.next()) {
        (Some(key), None) if key.starts_with('$') => Ok(()),
        _ => Err(MnemosyneError::InvalidArgument(WRONG_PIPELINES.to_string())),
    }
}

/// What `Collection::aggregate` accepts: a built pipeline or a raw stage list
#[derive(Debug, Clone)]
pub enum AggregateInput {
    Stages(Vec<BsonDocument>),
    Raw(Bson),
}

impl AggregateInput {
    /// Checked, non-empty stage list
    pub fn into_stages(self) -> Result<Vec<BsonDocument>> {
        let stages = match self {
            AggregateInput::Stages(stages) => stages,
            AggregateInput::Raw(Bson::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Bson::Document(stage) => Ok(stage),
                    _ => Err(MnemosyneError::InvalidArgument(WRONG_PIPELINES.to_string())),
                })
                .collect::<Result<Vec<_>>>()?,
            AggregateInput::Raw(_) => {
                return Err(MnemosyneError::InvalidArgument(WRONG_PIPELINES.to_string()))
            }
        };
        if stages.is_empty() {
            return Err(MnemosyneError::InvalidArgument(WRONG_PIPELINES.to_string()));
        }
        stages.iter().try_for_each(check_stage)?;
        Ok(stages)
    }
}

impl From<Pipeline> for AggregateInput {
    fn from(pipeline: Pipeline) -> Self {
        AggregateInput::Stages(pipeline.stages)
    }
}

impl From<&Pipeline> for AggregateInput {
    fn from(pipeline: &Pipeline) -> Self {
        AggregateInput::Stages(pipeline.stages.clone())
    }
}

impl From<Vec<BsonDocument>> for AggregateInput {
    fn from(stages: Vec<BsonDocument>) -> Self {
        AggregateInput::Stages(stages)
    }
}

impl From<Bson> for AggregateInput {
    fn from(value: Bson) -> Self {
        AggregateInput::Raw(value)
    }
}
