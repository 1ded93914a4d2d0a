//! Interfaces with collections: CRUD, find-and-modify, aggregation, bulk
//! writes, and index metadata.

pub mod error;
pub mod options;
pub mod results;

use std::collections::BTreeMap;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use log::debug;

use crate::aggregate::{sort_documents, Pipeline, PipelineContext, Projection};
use crate::coll::error::{BulkWriteException, WriteException};
use crate::coll::options::{
    AggregateOptions, BulkWriteOptions, CountOptions, FindOneAndDeleteOptions,
    FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOptions, IndexModel, ReplaceOptions,
    ReturnDocument, UpdateOptions, WriteModel,
};
use crate::coll::results::{
    BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult, WriteFailure,
};
use crate::cursor::Cursor;
use crate::db::Database;
use crate::error::{Error, ErrorCode, Result};
use crate::filter::{Filter, FilterEnv};
use crate::json;
use crate::path;
use crate::store::{encode_id_key, ScanPlan};
use crate::update::{
    collect_equalities, replacement_image, upsert_seed, validate_replacement, UpdateSpec,
};
use crate::value;

/// Interfaces with a collection of documents.
#[derive(Clone)]
pub struct Collection {
    db: Database,
    name: String,
}

impl Collection {
    pub(crate) fn new(db: Database, name: String) -> Collection {
        Collection { db, name }
    }

    /// The name of the collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the database the collection belongs to.
    pub fn db_name(&self) -> &str {
        self.db.name()
    }

    /// The full namespace, `db.collection`.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.db.name(), self.name)
    }

    fn existing_id(&self) -> Result<Option<i64>> {
        self.db.store().collection_id(self.db.name(), &self.name)
    }

    fn ensure_id(&self) -> Result<i64> {
        self.db.store().ensure_collection(self.db.name(), &self.name)
    }

    /// Fetches the documents matching `filter` in natural order, pushing
    /// down what the store can prove and evaluating the rest in-engine.
    fn read_matching(&self, filter: Option<&Document>, env: &FilterEnv) -> Result<Vec<Document>> {
        self.read_matching_hinted(filter, env, None)
    }

    fn read_matching_hinted(
        &self,
        filter: Option<&Document>,
        env: &FilterEnv,
        sort_hint: Option<&Document>,
    ) -> Result<Vec<Document>> {
        self.db.checkpoint()?;
        let collection_id = match self.existing_id()? {
            Some(collection_id) => collection_id,
            None => return Ok(Vec::new()),
        };
        let empty = Document::new();
        let compiled = Filter::parse(filter.unwrap_or(&empty))?;
        let mut plan = ScanPlan::for_filter(&compiled);
        if let Some(spec) = sort_hint {
            if spec.len() == 1 {
                let (field, direction) = spec.iter().next().unwrap();
                if let Some(d) = value::as_number(direction) {
                    plan.hint_order(field, d.as_f64() >= 0.0);
                }
            }
        }
        let rows = self.db.store().scan(collection_id, &plan)?;
        if plan.covering {
            return Ok(rows);
        }
        let mut matched = Vec::with_capacity(rows.len());
        for row in rows {
            if compiled.matches(&row, env)? {
                matched.push(row);
            }
        }
        Ok(matched)
    }

    /// Windowed variant for internal scans with a fixed skip/limit. When
    /// the plan covers the whole filter and no order is requested, the
    /// window is pushed into the store's `LIMIT`/`OFFSET`; otherwise it is
    /// applied after residual evaluation.
    fn read_matching_window(
        &self,
        filter: Option<&Document>,
        env: &FilterEnv,
        skip: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Document>> {
        if skip.map_or(false, |n| n < 0) {
            return Err(Error::ArgumentError("skip cannot be negative".to_owned()));
        }
        let skip = skip.unwrap_or(0);
        let limit = limit.filter(|n| *n >= 0);
        self.db.checkpoint()?;
        let collection_id = match self.existing_id()? {
            Some(collection_id) => collection_id,
            None => return Ok(Vec::new()),
        };
        let empty = Document::new();
        let compiled = Filter::parse(filter.unwrap_or(&empty))?;
        let mut plan = ScanPlan::for_filter(&compiled);
        if plan.covering {
            plan.limit = limit;
            plan.offset = if skip > 0 { Some(skip) } else { None };
            return self.db.store().scan(collection_id, &plan);
        }
        let rows = self.db.store().scan(collection_id, &plan)?;
        let mut matched = Vec::with_capacity(rows.len());
        for row in rows {
            if compiled.matches(&row, env)? {
                matched.push(row);
            }
        }
        let mut windowed: Vec<Document> = matched.into_iter().skip(skip as usize).collect();
        if let Some(limit) = limit {
            windowed.truncate(limit as usize);
        }
        Ok(windowed)
    }

    // ------------------------------------------------------------------
    // Reads

    /// Returns a cursor over the matching documents. Sort, skip, limit,
    /// and projection can be given in `options` or chained on the cursor;
    /// chained calls win on conflict.
    pub fn find(&self, filter: Option<Document>, options: Option<FindOptions>) -> Result<Cursor> {
        let env = FilterEnv::new();
        let options = options.unwrap_or_default();
        let docs = self.read_matching_hinted(filter.as_ref(), &env, options.sort.as_ref())?;
        Ok(Cursor::new(docs, options, self.db.cancellation_token()))
    }

    /// Returns the first matching document under the requested order.
    pub fn find_one(
        &self,
        filter: Option<Document>,
        options: Option<FindOptions>,
    ) -> Result<Option<Document>> {
        let options = options.unwrap_or_default();
        if options.sort.is_none() {
            // An unsorted single-document read pushes its window into the
            // scan when the filter is covered.
            let env = FilterEnv::new();
            let docs = self.read_matching_window(filter.as_ref(), &env, options.skip, Some(1))?;
            return match docs.into_iter().next() {
                Some(image) => self.project_image(image, options.projection).map(Some),
                None => Ok(None),
            };
        }
        let mut options = options;
        options.limit = Some(1);
        let mut cursor = self.find(filter, Some(options))?;
        cursor.next().transpose()
    }

    /// Counts the documents matching `filter`, honouring skip and limit.
    pub fn count_documents(
        &self,
        filter: Option<Document>,
        options: Option<CountOptions>,
    ) -> Result<i64> {
        let env = FilterEnv::new();
        let options = options.unwrap_or_default();
        let matched =
            self.read_matching_window(filter.as_ref(), &env, options.skip, options.limit)?;
        Ok(matched.len() as i64)
    }

    /// The collection's row count, with no filtering.
    pub fn estimated_document_count(&self) -> Result<i64> {
        self.db.checkpoint()?;
        match self.existing_id()? {
            Some(collection_id) => self.db.store().count_documents(collection_id),
            None => Ok(0),
        }
    }

    /// The distinct values at `field` across the matching documents.
    /// Array values contribute their elements.
    pub fn distinct(&self, field: &str, filter: Option<Document>) -> Result<Vec<Bson>> {
        let env = FilterEnv::new();
        let docs = self.read_matching(filter.as_ref(), &env)?;
        let mut distinct: Vec<Bson> = Vec::new();
        for doc in &docs {
            for resolved in path::resolve(doc, field) {
                let mut push = |candidate: &Bson| {
                    if !distinct.iter().any(|seen| value::values_equal(seen, candidate)) {
                        distinct.push(candidate.clone());
                    }
                };
                match *resolved {
                    Bson::Array(ref items) => {
                        for item in items {
                            push(item);
                        }
                    }
                    ref single => push(single),
                }
            }
        }
        Ok(distinct)
    }

    /// Runs an aggregation pipeline and returns a cursor over its output.
    pub fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Cursor> {
        self.db.checkpoint()?;
        let options = options.unwrap_or_default();
        let parsed = Pipeline::parse(&pipeline)?;
        let env = FilterEnv::new();
        // The leading $match drives the scan pushdown; the stage still
        // evaluates the full filter on whatever the store returns.
        let source = match self.existing_id()? {
            Some(collection_id) => {
                let plan = match parsed.leading_match() {
                    Some(filter) => ScanPlan::for_filter(filter),
                    None => ScanPlan::full(),
                };
                self.db.store().scan(collection_id, &plan)?
            }
            None => Vec::new(),
        };
        let ctx = PipelineContext {
            store: self.db.store(),
            db_name: self.db.name(),
            env,
            cancel: self.db.cancellation_token(),
            max_buffered: options.max_buffered,
        };
        let produced = parsed.run(source, &ctx)?;
        let mut cursor_options = FindOptions::new();
        cursor_options.batch_size = options.batch_size;
        Ok(Cursor::new(
            produced,
            cursor_options,
            self.db.cancellation_token(),
        ))
    }

    // ------------------------------------------------------------------
    // Writes

    /// Inserts a document, assigning an ObjectId `_id` when none is given.
    pub fn insert_one(&self, doc: Document) -> Result<InsertOneResult> {
        self.db.checkpoint()?;
        let id = self.insert_document(doc)?;
        Ok(InsertOneResult::new(Some(id)))
    }

    /// Inserts a batch of documents in order, stopping at the first
    /// failure. The failure carries the ids inserted before it.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<InsertManyResult> {
        self.db.checkpoint()?;
        let mut inserted_ids = BTreeMap::new();
        for (index, doc) in docs.into_iter().enumerate() {
            match self.insert_document(doc) {
                Ok(id) => {
                    inserted_ids.insert(index, id);
                }
                Err(err) => {
                    let failure = WriteFailure {
                        index,
                        code: err.code().unwrap_or(ErrorCode::DuplicateKey.code()),
                        message: err.to_string(),
                    };
                    return Err(Error::BulkWriteError(BulkWriteException::new(
                        inserted_ids,
                        vec![failure],
                    )));
                }
            }
        }
        Ok(InsertManyResult::new(inserted_ids))
    }

    fn insert_document(&self, doc: Document) -> Result<Bson> {
        let collection_id = self.ensure_id()?;
        let (id, image) = normalize_insert(doc)?;
        let payload = json::encode_document(&image)?;
        if !self
            .db
            .store()
            .insert_document(collection_id, &encode_id_key(&id), &payload)?
        {
            return Err(Error::WriteError(WriteException::duplicate_key(
                &self.namespace(),
                &id,
            )));
        }
        debug!("{}: inserted _id {}", self.namespace(), id);
        Ok(id)
    }

    /// Applies an operator update to the first matching document.
    pub fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let upsert = options.map_or(false, |o| o.upsert);
        self.update_with_limit(filter, update, upsert, true)
    }

    /// Applies an operator update to every matching document.
    pub fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateResult> {
        let upsert = options.map_or(false, |o| o.upsert);
        self.update_with_limit(filter, update, upsert, false)
    }

    fn update_with_limit(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        single: bool,
    ) -> Result<UpdateResult> {
        self.db.checkpoint()?;
        if !UpdateSpec::is_operator_document(&update) {
            return Err(Error::BadUpdate(
                "update documents must use update operators; use replace_one for a plain \
                 replacement"
                    .to_owned(),
            ));
        }
        let spec = UpdateSpec::parse(&update)?;
        let env = FilterEnv::new();
        let mut matched = self.read_matching(Some(&filter), &env)?;
        if matched.is_empty() {
            if !upsert {
                return Ok(UpdateResult::new(0, 0, None));
            }
            let id = self.insert_upsert(&filter, &spec)?;
            return Ok(UpdateResult::new(0, 0, Some(id)));
        }
        if single {
            matched.truncate(1);
        }
        let collection_id = self.ensure_id()?;
        let mut modified_count = 0;
        let matched_count = matched.len() as i64;
        for before in matched {
            let (after, modified) = spec.apply(&before)?;
            if !modified {
                continue;
            }
            let id = document_id(&after)?;
            let payload = json::encode_document(&after)?;
            self.db
                .store()
                .replace_document(collection_id, &encode_id_key(&id), &payload)?;
            modified_count += 1;
        }
        debug!(
            "{}: update matched {} modified {}",
            self.namespace(),
            matched_count,
            modified_count
        );
        Ok(UpdateResult::new(matched_count, modified_count, None))
    }

    fn insert_upsert(&self, filter: &Document, spec: &UpdateSpec) -> Result<Bson> {
        let mut synthesised = upsert_seed(filter, spec)?;
        if synthesised.get("_id").is_none() {
            synthesised.insert("_id".to_owned(), Bson::ObjectId(ObjectId::new()?));
        }
        self.insert_document(synthesised)
    }

    /// Replaces the first matching document wholesale, preserving `_id`.
    pub fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<ReplaceOptions>,
    ) -> Result<UpdateResult> {
        self.db.checkpoint()?;
        let upsert = options.map_or(false, |o| o.upsert);
        let env = FilterEnv::new();
        let matched = self.read_matching(Some(&filter), &env)?;
        let before = match matched.into_iter().next() {
            Some(before) => before,
            None => {
                validate_replacement(&replacement, None)?;
                if !upsert {
                    return Ok(UpdateResult::new(0, 0, None));
                }
                let id = self.insert_replacement_upsert(&filter, &replacement)?;
                return Ok(UpdateResult::new(0, 0, Some(id)));
            }
        };
        let id = document_id(&before)?;
        validate_replacement(&replacement, Some(&id))?;
        let after = replacement_image(&replacement, id.clone());
        let modified = after != before;
        if modified {
            let collection_id = self.ensure_id()?;
            let payload = json::encode_document(&after)?;
            self.db
                .store()
                .replace_document(collection_id, &encode_id_key(&id), &payload)?;
        }
        Ok(UpdateResult::new(1, if modified { 1 } else { 0 }, None))
    }

    fn insert_replacement_upsert(&self, filter: &Document, replacement: &Document) -> Result<Bson> {
        // The filter's equality keys seed the image; the replacement wins
        // on overlap.
        let mut seed = Document::new();
        collect_equalities(filter, &mut seed)?;
        for (key, val) in replacement.iter() {
            seed.insert(key.clone(), val.clone());
        }
        if seed.get("_id").is_none() {
            seed.insert("_id".to_owned(), Bson::ObjectId(ObjectId::new()?));
        }
        self.insert_document(seed)
    }

    /// Deletes the first matching document.
    pub fn delete_one(&self, filter: Document) -> Result<DeleteResult> {
        self.delete_with_limit(filter, true)
    }

    /// Deletes every matching document.
    pub fn delete_many(&self, filter: Document) -> Result<DeleteResult> {
        self.delete_with_limit(filter, false)
    }

    fn delete_with_limit(&self, filter: Document, single: bool) -> Result<DeleteResult> {
        self.db.checkpoint()?;
        let env = FilterEnv::new();
        let mut matched = self.read_matching(Some(&filter), &env)?;
        if single {
            matched.truncate(1);
        }
        let collection_id = match self.existing_id()? {
            Some(collection_id) => collection_id,
            None => return Ok(DeleteResult::new(0)),
        };
        let mut deleted = 0;
        for doc in matched {
            let id = document_id(&doc)?;
            deleted += self
                .db
                .store()
                .delete_document(collection_id, &encode_id_key(&id))? as i64;
        }
        debug!("{}: deleted {}", self.namespace(), deleted);
        Ok(DeleteResult::new(deleted))
    }

    // ------------------------------------------------------------------
    // Find-and-modify

    /// Atomically updates one document, returning the pre-image by default
    /// or the post-image under `ReturnDocument::After`.
    pub fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
    ) -> Result<Option<Document>> {
        self.db.checkpoint()?;
        let options = options.unwrap_or_default();
        if !UpdateSpec::is_operator_document(&update) {
            return Err(Error::BadUpdate(
                "find_one_and_update requires update operators".to_owned(),
            ));
        }
        let spec = UpdateSpec::parse(&update)?;
        let before = match self.pick_one(&filter, options.sort.as_ref())? {
            Some(before) => before,
            None => {
                if !options.upsert {
                    return Ok(None);
                }
                let id = self.insert_upsert(&filter, &spec)?;
                return self.image_after_upsert(&id, options.return_document, options.projection);
            }
        };
        let (after, modified) = spec.apply(&before)?;
        if modified {
            let collection_id = self.ensure_id()?;
            let id = document_id(&after)?;
            let payload = json::encode_document(&after)?;
            self.db
                .store()
                .replace_document(collection_id, &encode_id_key(&id), &payload)?;
        }
        let image = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        };
        self.project_image(image, options.projection).map(Some)
    }

    /// Atomically replaces one document, returning the pre- or post-image.
    pub fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<FindOneAndReplaceOptions>,
    ) -> Result<Option<Document>> {
        self.db.checkpoint()?;
        let options = options.unwrap_or_default();
        let before = match self.pick_one(&filter, options.sort.as_ref())? {
            Some(before) => before,
            None => {
                validate_replacement(&replacement, None)?;
                if !options.upsert {
                    return Ok(None);
                }
                let id = self.insert_replacement_upsert(&filter, &replacement)?;
                return self.image_after_upsert(&id, options.return_document, options.projection);
            }
        };
        let id = document_id(&before)?;
        validate_replacement(&replacement, Some(&id))?;
        let after = replacement_image(&replacement, id.clone());
        if after != before {
            let collection_id = self.ensure_id()?;
            let payload = json::encode_document(&after)?;
            self.db
                .store()
                .replace_document(collection_id, &encode_id_key(&id), &payload)?;
        }
        let image = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        };
        self.project_image(image, options.projection).map(Some)
    }

    /// Atomically deletes one document, returning its pre-image.
    pub fn find_one_and_delete(
        &self,
        filter: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> Result<Option<Document>> {
        self.db.checkpoint()?;
        let options = options.unwrap_or_default();
        let before = match self.pick_one(&filter, options.sort.as_ref())? {
            Some(before) => before,
            None => return Ok(None),
        };
        if let Some(collection_id) = self.existing_id()? {
            let id = document_id(&before)?;
            self.db
                .store()
                .delete_document(collection_id, &encode_id_key(&id))?;
        }
        self.project_image(before, options.projection).map(Some)
    }

    fn pick_one(&self, filter: &Document, sort: Option<&Document>) -> Result<Option<Document>> {
        let env = FilterEnv::new();
        let mut matched = self.read_matching(Some(filter), &env)?;
        if let Some(spec) = sort {
            let keys = crate::aggregate::parse_sort(spec)?;
            sort_documents(&mut matched, &keys);
        }
        Ok(matched.into_iter().next())
    }

    fn image_after_upsert(
        &self,
        id: &Bson,
        return_document: ReturnDocument,
        projection: Option<Document>,
    ) -> Result<Option<Document>> {
        match return_document {
            ReturnDocument::Before => Ok(None),
            ReturnDocument::After => {
                let mut filter = Document::new();
                filter.insert("_id".to_owned(), id.clone());
                let env = FilterEnv::new();
                match self.read_matching(Some(&filter), &env)?.into_iter().next() {
                    Some(image) => self.project_image(image, projection).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn project_image(&self, image: Document, projection: Option<Document>) -> Result<Document> {
        match projection {
            Some(ref spec) => {
                let parsed = Projection::parse(spec)?;
                parsed.apply(&image, &FilterEnv::new())
            }
            None => Ok(image),
        }
    }

    // ------------------------------------------------------------------
    // Bulk writes

    /// Executes a batch of write operations. An ordered bulk stops at the
    /// first failure; an unordered bulk attempts every operation. Failures
    /// are reported in `write_errors` alongside the partial counts.
    pub fn bulk_write(
        &self,
        ops: Vec<WriteModel>,
        options: Option<BulkWriteOptions>,
    ) -> Result<BulkWriteResult> {
        self.db.checkpoint()?;
        let ordered = options.unwrap_or_default().is_ordered();
        let mut result = BulkWriteResult::new();
        for (index, op) in ops.into_iter().enumerate() {
            let outcome = self.apply_write_model(index, op, &mut result);
            if let Err(err) = outcome {
                result.write_errors.push(WriteFailure {
                    index,
                    code: err.code().unwrap_or(0),
                    message: err.to_string(),
                });
                if ordered {
                    break;
                }
            }
        }
        Ok(result)
    }

    fn apply_write_model(
        &self,
        index: usize,
        op: WriteModel,
        result: &mut BulkWriteResult,
    ) -> Result<()> {
        match op {
            WriteModel::InsertOne { document } => {
                let id = self.insert_document(document)?;
                result.inserted_count += 1;
                result.inserted_ids.insert(index, id);
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let update_result = self.update_with_limit(filter, update, upsert, true)?;
                merge_update_counts(result, index, update_result);
            }
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let update_result = self.update_with_limit(filter, update, upsert, false)?;
                merge_update_counts(result, index, update_result);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let mut replace_options = ReplaceOptions::new();
                replace_options.upsert = upsert;
                let update_result = self.replace_one(filter, replacement, Some(replace_options))?;
                merge_update_counts(result, index, update_result);
            }
            WriteModel::DeleteOne { filter } => {
                result.deleted_count += self.delete_one(filter)?.deleted_count;
            }
            WriteModel::DeleteMany { filter } => {
                result.deleted_count += self.delete_many(filter)?.deleted_count;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Index metadata and collection admin

    /// Creates an index and returns its name.
    pub fn create_index(&self, model: IndexModel) -> Result<String> {
        self.db.checkpoint()?;
        let name = model.name();
        validate_index_name(&name)?;
        if model.keys.is_empty() {
            return Err(Error::ArgumentError(
                "an index requires at least one key".to_owned(),
            ));
        }
        let collection_id = self.ensure_id()?;
        self.db
            .store()
            .create_index(collection_id, &name, &model.keys, model.options.unique)?;
        Ok(name)
    }

    pub fn create_indexes(&self, models: Vec<IndexModel>) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(models.len());
        for model in models {
            names.push(self.create_index(model)?);
        }
        Ok(names)
    }

    /// Lists index descriptions, always including the implicit `_id_`
    /// index.
    pub fn list_indexes(&self) -> Result<Cursor> {
        self.db.checkpoint()?;
        let mut descriptions = Vec::new();
        let mut id_index = Document::new();
        id_index.insert("v".to_owned(), Bson::I32(2));
        let mut id_key = Document::new();
        id_key.insert("_id".to_owned(), Bson::I32(1));
        id_index.insert("key".to_owned(), Bson::Document(id_key));
        id_index.insert("name".to_owned(), Bson::String("_id_".to_owned()));
        descriptions.push(id_index);
        if let Some(collection_id) = self.existing_id()? {
            for (name, keys, unique) in self.db.store().list_indexes(collection_id)? {
                let mut description = Document::new();
                description.insert("v".to_owned(), Bson::I32(2));
                description.insert("key".to_owned(), Bson::Document(keys));
                description.insert("name".to_owned(), Bson::String(name));
                if unique {
                    description.insert("unique".to_owned(), Bson::Boolean(true));
                }
                descriptions.push(description);
            }
        }
        Ok(Cursor::new(
            descriptions,
            FindOptions::new(),
            self.db.cancellation_token(),
        ))
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.db.checkpoint()?;
        if name == "_id_" {
            return Err(Error::ArgumentError(
                "the _id index cannot be dropped".to_owned(),
            ));
        }
        validate_index_name(name)?;
        let collection_id = match self.existing_id()? {
            Some(collection_id) => collection_id,
            None => {
                return Err(Error::OperationError(format!(
                    "index {} not found on {}",
                    name,
                    self.namespace()
                )));
            }
        };
        if !self.db.store().drop_index(collection_id, name)? {
            return Err(Error::OperationError(format!(
                "index {} not found on {}",
                name,
                self.namespace()
            )));
        }
        Ok(())
    }

    /// Drops every index except `_id_`.
    pub fn drop_indexes(&self) -> Result<()> {
        self.db.checkpoint()?;
        if let Some(collection_id) = self.existing_id()? {
            for (name, _, _) in self.db.store().list_indexes(collection_id)? {
                self.db.store().drop_index(collection_id, &name)?;
            }
        }
        Ok(())
    }

    /// Drops the collection and its indexes.
    pub fn drop(&self) -> Result<()> {
        self.db.checkpoint()?;
        self.db.store().drop_collection(self.db.name(), &self.name)
    }

    /// Renames the collection; this handle observes the new name.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        self.db.checkpoint()?;
        if new_name.is_empty() || new_name.contains('$') || new_name.contains('\0') {
            return Err(Error::ArgumentError(format!(
                "invalid collection name: {}",
                new_name
            )));
        }
        self.db
            .store()
            .rename_collection(self.db.name(), &self.name, new_name)?;
        self.name = new_name.to_owned();
        Ok(())
    }
}

fn merge_update_counts(result: &mut BulkWriteResult, index: usize, update: UpdateResult) {
    result.matched_count += update.matched_count;
    result.modified_count += update.modified_count;
    if let Some(id) = update.upserted_id {
        result.upserted_count += 1;
        result.upserted_ids.insert(index, id);
    }
}

/// Pulls the `_id` out of a stored document; every stored document has one.
fn document_id(doc: &Document) -> Result<Bson> {
    doc.get("_id")
        .cloned()
        .ok_or_else(|| Error::OperationError("stored document has no _id".to_owned()))
}

/// Ensures the insert image carries `_id` first, assigning a fresh
/// ObjectId when the caller did not provide one.
fn normalize_insert(doc: Document) -> Result<(Bson, Document)> {
    let id = match doc.get("_id") {
        Some(id) => id.clone(),
        None => Bson::ObjectId(ObjectId::new()?),
    };
    let mut image = Document::new();
    image.insert("_id".to_owned(), id.clone());
    for (key, val) in doc.into_iter() {
        if key != "_id" {
            image.insert(key, val);
        }
    }
    Ok((id, image))
}

fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') || name.contains('$') {
        return Err(Error::ArgumentError(format!(
            "invalid index name: {:?}",
            name
        )));
    }
    Ok(())
}
