//! Table-schema catalog.
//!
//! The catalog maps schema names to [`TableSchema`] records: the list of
//! indexes (and their ids) that make up a table. Records live in a small
//! append-only **container** region (a two-page overflow allocation) and
//! are located through a dedicated catalog B+tree mapping
//! `name -> item id`; the tree's root page is recorded in the file header.
//!
//! The catalog describes itself: the schema named `"root"` lists the
//! container and the catalog tree as its two indexes. On a fresh database
//! nothing is materialized -- the root schema is served from a built-in
//! constant, and the first schema write allocates the container and the
//! tree. Those are the first two allocations a fresh database performs,
//! which pins the root schema's ids to pages 2-3 (container) and 4
//! (tree).
//!
//! An item id packs the container's first page and the record's byte
//! offset within the container as `page << 16 | offset`.

use log::debug;

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::meta::PageMetadata;
use crate::pages::PAGE_SIZE;
use crate::txn::Transaction;
use crate::varint;

/// Name of the schema describing the catalog itself.
pub const ROOT_SCHEMA: &str = "root";

/// Container id the root schema reports on a fresh database.
pub const ROOT_CONTAINER_ID: u64 = 2;

/// Catalog-tree id the root schema reports on a fresh database.
pub const ROOT_BTREE_ID: u64 = 4;

/// Pages in the catalog's record container.
const CONTAINER_PAGES: u32 = 2;

/// The kind of an index attached to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// An item container holding variable-length records.
    Container,
    /// A B+tree.
    Btree,
}

impl IndexType {
    fn code(self) -> u64 {
        match self {
            IndexType::Container => 1,
            IndexType::Btree => 2,
        }
    }

    fn from_code(code: u64) -> Result<IndexType> {
        match code {
            1 => Ok(IndexType::Container),
            2 => Ok(IndexType::Btree),
            other => Err(Error::Corruption(format!(
                "unknown index type code {other} in catalog record"
            ))),
        }
    }
}

/// One index of a table schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaIndex {
    pub kind: IndexType,
    /// The index id: the root page of a tree, or the first page of a
    /// container.
    pub id: u64,
}

/// A named table schema: an ordered list of indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub indexes: Vec<SchemaIndex>,
}

impl TableSchema {
    /// Number of indexes in the schema.
    pub fn count(&self) -> usize {
        self.indexes.len()
    }

    /// The index kinds, in schema order.
    pub fn types(&self) -> Vec<IndexType> {
        self.indexes.iter().map(|i| i.kind).collect()
    }

    /// The index ids, in schema order.
    pub fn index_ids(&self) -> Vec<u64> {
        self.indexes.iter().map(|i| i.id).collect()
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        varint::encode(self.name.len() as u64, &mut buf);
        buf.extend_from_slice(self.name.as_bytes());
        varint::encode(self.indexes.len() as u64, &mut buf);
        for index in &self.indexes {
            varint::encode(index.kind.code(), &mut buf);
            varint::encode(index.id, &mut buf);
        }
        buf
    }

    fn decode(buf: &[u8]) -> Result<TableSchema> {
        let (name_len, mut at) = varint::decode(buf)?;
        let name_end = at + name_len as usize;
        if name_end > buf.len() {
            return Err(Error::Corruption("catalog record name overruns".into()));
        }
        let name = String::from_utf8(buf[at..name_end].to_vec())
            .map_err(|_| Error::Corruption("catalog record name is not UTF-8".into()))?;
        at = name_end;

        let (count, used) = varint::decode(&buf[at..])?;
        at += used;
        let mut indexes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (code, used) = varint::decode(&buf[at..])?;
            at += used;
            let (id, used) = varint::decode(&buf[at..])?;
            at += used;
            indexes.push(SchemaIndex {
                kind: IndexType::from_code(code)?,
                id,
            });
        }
        Ok(TableSchema { name, indexes })
    }
}

/// The root schema a fresh database serves before anything materialized.
pub fn root_schema() -> TableSchema {
    TableSchema {
        name: ROOT_SCHEMA.to_string(),
        indexes: vec![
            SchemaIndex {
                kind: IndexType::Container,
                id: ROOT_CONTAINER_ID,
            },
            SchemaIndex {
                kind: IndexType::Btree,
                id: ROOT_BTREE_ID,
            },
        ],
    }
}

/// Look up the schema stored under `name`.
///
/// On a database whose catalog has not materialized yet, only the root
/// schema exists, served from the built-in constant.
pub fn schema(tx: &mut Transaction<'_>, name: &str) -> Result<Option<TableSchema>> {
    let header = tx.file_header()?;
    if header.catalog_root == 0 {
        return Ok(if name == ROOT_SCHEMA {
            Some(root_schema())
        } else {
            None
        });
    }

    let tree = BTree::open(header.catalog_root as u64);
    let item = match tree.get(tx, name.as_bytes())? {
        Some(item) => item,
        None => return Ok(None),
    };
    read_record(tx, item).map(Some)
}

/// Insert or replace `schema` in the catalog, materializing the catalog
/// structures on first use.
///
/// # Errors
///
/// * [`Error::InvalidArgument`] -- empty schema name, or an attempt to
///   redefine the root schema.
/// * [`Error::NoSpace`] -- the record container is full.
pub fn create_schema(tx: &mut Transaction<'_>, schema: &TableSchema) -> Result<()> {
    if schema.name.is_empty() {
        return Err(Error::InvalidArgument("schema name cannot be empty".into()));
    }
    if schema.name == ROOT_SCHEMA {
        return Err(Error::InvalidArgument(
            "the root schema is maintained by the engine".into(),
        ));
    }

    let header = tx.file_header()?;
    let mut tree = if header.catalog_root == 0 {
        materialize(tx)?
    } else {
        BTree::open(header.catalog_root as u64)
    };

    let container = container_of(tx, &tree)?;
    let item = append_record(tx, container, &schema.encode())?;
    tree.set(tx, schema.name.as_bytes(), item)?;
    store_catalog_root(tx, &tree)?;

    debug!("catalog schema '{}' stored at item {item}", schema.name);
    Ok(())
}

/// First schema write: allocate the container and the catalog tree, then
/// record the root schema describing them.
fn materialize(tx: &mut Transaction<'_>) -> Result<BTree> {
    let container = tx.allocate_page(
        PageMetadata::Overflow {
            number_of_pages: CONTAINER_PAGES,
            content_size: 2,
        },
        0,
    )?;
    {
        // The first two bytes of the container hold the append cursor.
        let body = tx.raw_modify_page(container, CONTAINER_PAGES)?;
        body[0..2].copy_from_slice(&2u16.to_le_bytes());
    }

    let mut tree = BTree::create(tx)?;

    let root = TableSchema {
        name: ROOT_SCHEMA.to_string(),
        indexes: vec![
            SchemaIndex {
                kind: IndexType::Container,
                id: container,
            },
            SchemaIndex {
                kind: IndexType::Btree,
                id: tree.root(),
            },
        ],
    };
    let item = append_record(tx, container, &root.encode())?;
    tree.set(tx, ROOT_SCHEMA.as_bytes(), item)?;
    store_catalog_root(tx, &tree)?;

    debug!(
        "catalog materialized: container at {container}, tree at {}",
        tree.root()
    );
    Ok(tree)
}

/// The container page recorded in the root schema.
fn container_of(tx: &mut Transaction<'_>, tree: &BTree) -> Result<u64> {
    let item = tree.get(tx, ROOT_SCHEMA.as_bytes())?.ok_or_else(|| {
        Error::Corruption("materialized catalog has no root schema".into())
    })?;
    let root = read_record(tx, item)?;
    root.indexes
        .iter()
        .find(|i| i.kind == IndexType::Container)
        .map(|i| i.id)
        .ok_or_else(|| Error::Corruption("root schema lists no container".into()))
}

/// Append an encoded record to the container; returns its item id.
fn append_record(tx: &mut Transaction<'_>, container: u64, record: &[u8]) -> Result<u64> {
    let body = tx.raw_modify_page(container, CONTAINER_PAGES)?;
    let offset = u16::from_le_bytes([body[0], body[1]]) as usize;

    let mut framed = Vec::with_capacity(record.len() + 2);
    varint::encode(record.len() as u64, &mut framed);
    framed.extend_from_slice(record);

    let end = offset + framed.len();
    if end > CONTAINER_PAGES as usize * PAGE_SIZE {
        return Err(Error::NoSpace("the catalog container is full".into()));
    }
    body[offset..end].copy_from_slice(&framed);
    body[0..2].copy_from_slice(&(end as u16).to_le_bytes());

    tx.set_metadata(
        container,
        &PageMetadata::Overflow {
            number_of_pages: CONTAINER_PAGES,
            content_size: end as u64,
        },
    )?;
    Ok(container << 16 | offset as u64)
}

/// Resolve an item id and decode the schema record it points at.
fn read_record(tx: &mut Transaction<'_>, item: u64) -> Result<TableSchema> {
    let container = item >> 16;
    let offset = (item & 0xFFFF) as usize;
    let body = tx.get_page(container)?;
    if offset + 1 >= body.len() {
        return Err(Error::Corruption(format!(
            "catalog item {item} points outside the container"
        )));
    }
    let (len, used) = varint::decode(&body[offset..])?;
    let start = offset + used;
    let end = start + len as usize;
    if end > body.len() {
        return Err(Error::Corruption(format!(
            "catalog item {item} overruns the container"
        )));
    }
    TableSchema::decode(&body[start..end])
}

/// Persist the catalog tree's (possibly changed) root in the file header.
fn store_catalog_root(tx: &mut Transaction<'_>, tree: &BTree) -> Result<()> {
    let mut header = tx.file_header()?;
    if header.catalog_root as u64 != tree.root() {
        header.catalog_root = tree.root() as u32;
        tx.set_metadata(0, &PageMetadata::FileHeader(header))?;
    }
    Ok(())
}
