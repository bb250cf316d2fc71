//! In-memory model of the destination schema: an arena of tables addressed
//! by index, with FK and reverse-FK relations held as index adjacency rather
//! than object references.
//!
//! The model is built once by [`loader`], frozen by [`SchemaModel::finalize`],
//! and from then on only the per-table transfer state (the accumulating set
//! of primary keys plus two flags) is mutated, under a per-table lock.

pub mod loader;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::Settings;
use crate::constants::ROW_COUNT_SLACK;

pub type TableId = usize;

/// PostgreSQL types whose literals are written bare in generated SQL.
pub const NUMERIC_DATA_TYPES: [&str; 6] = [
    "smallint",
    "integer",
    "bigint",
    "smallserial",
    "serial",
    "bigserial",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
}

impl ConstraintKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PRIMARY KEY" => Some(Self::PrimaryKey),
            "FOREIGN KEY" => Some(Self::ForeignKey),
            "UNIQUE" => Some(Self::Unique),
            _ => None,
        }
    }
}

/// A primary-key (or foreign-key) value. The engine's whole value domain is
/// integers plus text; everything non-numeric travels as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PkValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{v}"),
            PkValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub table: TableId,
    pub name: String,
    pub data_type: String,
    pub ordinal_position: i32,
    /// Table named by this column's constraint. For a FOREIGN KEY this is
    /// the referent; for PRIMARY KEY / UNIQUE it is the owning table itself.
    pub referenced_table: Option<TableId>,
    pub constraint_kinds: Vec<ConstraintKind>,
    /// Set during finalize: the column scopes rows to a tenant, either by
    /// name or because it references the key table.
    pub is_key_column: bool,
}

impl Column {
    pub fn is_foreign_key(&self) -> bool {
        self.constraint_kinds.contains(&ConstraintKind::ForeignKey)
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraint_kinds.contains(&ConstraintKind::PrimaryKey)
    }

    /// A column is unique when declared UNIQUE, or when it is both a
    /// foreign key and the primary key (a one-to-one link).
    pub fn is_unique(&self) -> bool {
        self.constraint_kinds.contains(&ConstraintKind::Unique)
            || (self.is_foreign_key() && self.is_primary_key())
    }

    pub fn is_self_fk(&self) -> bool {
        self.is_foreign_key() && self.referenced_table == Some(self.table)
    }

    pub fn is_numeric(&self) -> bool {
        NUMERIC_DATA_TYPES.contains(&self.data_type.as_str())
    }
}

#[derive(Debug)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    /// Estimated row count on the source, filled by the row-count stage.
    pub full_count: u64,
    /// Maximum primary-key value on the source; None for non-numeric keys.
    pub max_pk: Option<i64>,
    /// Table resolves rows through a (content_type_id, object_id) pair.
    pub is_generic: bool,
    /// Copied from the settings during finalize; see
    /// [`Table::is_full_prepared`].
    row_count_slack: u64,

    /// Referring table -> indexes of the referring table's columns.
    pub reverse_fk: BTreeMap<TableId, BTreeSet<usize>>,

    // Derived once in finalize, read-only afterwards.
    pub primary_key: Option<usize>,
    pub key_column: Option<usize>,
    pub fk_columns: Vec<usize>,
    pub self_fk_columns: Vec<usize>,
    pub not_self_fk_columns: Vec<usize>,
    pub unique_fk_columns: Vec<usize>,
    /// FKs whose referent carries the key column.
    pub fk_columns_to_key_tables: Vec<usize>,
    pub unique_fk_columns_to_key_tables: Vec<usize>,
    /// FKs whose referent itself has an FK into a key-column table.
    pub fk_columns_to_key_adjacent: Vec<usize>,
    pub unique_fk_columns_to_key_adjacent: Vec<usize>,
    pub highest_priority_fk_columns: Vec<usize>,

    // Mutable closure state. The set only ever grows; writers take the lock
    // for the duration of the union and never across an await point.
    need_transfer_pks: Mutex<BTreeSet<PkValue>>,
    is_checked: AtomicBool,
    is_ready_for_transferring: AtomicBool,
    transferred_count: AtomicU64,
}

impl Table {
    fn new(id: TableId, name: String) -> Self {
        Self {
            id,
            name,
            columns: Vec::new(),
            full_count: 0,
            max_pk: None,
            is_generic: false,
            row_count_slack: ROW_COUNT_SLACK,
            reverse_fk: BTreeMap::new(),
            primary_key: None,
            key_column: None,
            fk_columns: Vec::new(),
            self_fk_columns: Vec::new(),
            not_self_fk_columns: Vec::new(),
            unique_fk_columns: Vec::new(),
            fk_columns_to_key_tables: Vec::new(),
            unique_fk_columns_to_key_tables: Vec::new(),
            fk_columns_to_key_adjacent: Vec::new(),
            unique_fk_columns_to_key_adjacent: Vec::new(),
            highest_priority_fk_columns: Vec::new(),
            need_transfer_pks: Mutex::new(BTreeSet::new()),
            is_checked: AtomicBool::new(false),
            is_ready_for_transferring: AtomicBool::new(false),
            transferred_count: AtomicU64::new(0),
        }
    }

    pub fn with_fk(&self) -> bool {
        !self.fk_columns.is_empty()
    }

    pub fn with_key_column(&self) -> bool {
        self.key_column.is_some()
    }

    pub fn primary_key_column(&self) -> Option<&Column> {
        self.primary_key.map(|i| &self.columns[i])
    }

    pub fn key_column_ref(&self) -> Option<&Column> {
        self.key_column.map(|i| &self.columns[i])
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_checked(&self) -> bool {
        self.is_checked.load(Ordering::SeqCst)
    }

    pub fn set_checked(&self) {
        self.is_checked.store(true, Ordering::SeqCst);
    }

    pub fn is_ready_for_transferring(&self) -> bool {
        self.is_ready_for_transferring.load(Ordering::SeqCst)
    }

    pub fn set_ready_for_transferring(&self) {
        self.is_ready_for_transferring.store(true, Ordering::SeqCst);
    }

    pub fn need_transfer_snapshot(&self) -> BTreeSet<PkValue> {
        self.need_transfer_pks.lock().unwrap().clone()
    }

    pub fn need_transfer_len(&self) -> usize {
        self.need_transfer_pks.lock().unwrap().len()
    }

    pub fn update_need_transfer_pks<I>(&self, values: I)
    where
        I: IntoIterator<Item = PkValue>,
    {
        self.need_transfer_pks.lock().unwrap().extend(values);
    }

    /// The subset of `candidates` not yet scheduled for transfer.
    pub fn missing_from_need_transfer(&self, candidates: &BTreeSet<PkValue>) -> BTreeSet<PkValue> {
        let current = self.need_transfer_pks.lock().unwrap();
        candidates.difference(&current).cloned().collect()
    }

    /// The transfer set already covers the whole table, within the slack
    /// that accounts for concurrent writes on the live source. Empty tables
    /// (or tables the row-count stage never reached) are never "full".
    pub fn is_full_prepared(&self) -> bool {
        self.full_count > 0
            && self.need_transfer_len() as u64 + self.row_count_slack >= self.full_count
    }

    pub fn add_transferred(&self, rows: u64) {
        self.transferred_count.fetch_add(rows, Ordering::SeqCst);
    }

    pub fn transferred_count(&self) -> u64 {
        self.transferred_count.load(Ordering::SeqCst)
    }

    /// Column names, ordered by ordinal position, quoted and comma joined.
    pub fn columns_list_sql(&self) -> String {
        let mut ordered: Vec<&Column> = self.columns.iter().collect();
        ordered.sort_by_key(|c| c.ordinal_position);
        ordered
            .iter()
            .map(|c| crate::sql::quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Default)]
pub struct SchemaModel {
    tables: Vec<Table>,
    by_name: HashMap<String, TableId>,
    pub key_table: Option<TableId>,
}

impl SchemaModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: &str) -> TableId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.tables.len();
        self.tables.push(Table::new(id, name.to_string()));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id]
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.by_name.get(name).map(|&id| &self.tables[id])
    }

    pub fn id_of(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).copied()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Record one catalog row. A column may own several constraints and
    /// therefore arrive several times; only a FOREIGN KEY row repoints the
    /// referenced table.
    pub fn append_column(
        &mut self,
        table_id: TableId,
        name: &str,
        data_type: &str,
        ordinal_position: i32,
        referenced_table: Option<TableId>,
        constraint_kind: Option<ConstraintKind>,
    ) {
        let table = &mut self.tables[table_id];
        let idx = match table.columns.iter().position(|c| c.name == name) {
            Some(idx) => {
                if let Some(kind) = constraint_kind {
                    table.columns[idx].constraint_kinds.push(kind);
                    if kind == ConstraintKind::ForeignKey {
                        table.columns[idx].referenced_table = referenced_table;
                    }
                }
                idx
            }
            None => {
                // The catalog reports array columns with the bare type ARRAY.
                let data_type = if data_type == "ARRAY" {
                    "integer array"
                } else {
                    data_type
                };
                table.columns.push(Column {
                    table: table_id,
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    ordinal_position,
                    referenced_table,
                    constraint_kinds: constraint_kind.into_iter().collect(),
                    is_key_column: false,
                });
                table.columns.len() - 1
            }
        };

        let is_fk = table.columns[idx].is_foreign_key();
        let referent = table.columns[idx].referenced_table;
        if is_fk && let Some(referent) = referent {
            self.tables[referent]
                .reverse_fk
                .entry(table_id)
                .or_default()
                .insert(idx);
        }
    }

    /// Compute every derived property and freeze the model. Must run after
    /// the last catalog batch and before any collector touches the model.
    pub fn finalize(&mut self, settings: &Settings) {
        self.key_table = self.by_name.get(&settings.key_table_name).copied();
        let key_table = self.key_table;
        let key_column_names: HashSet<&str> = settings
            .key_column_names
            .iter()
            .map(|s| s.as_str())
            .collect();
        let generic_tables: HashSet<&str> = settings
            .tables_with_generic_foreign_key
            .iter()
            .map(|s| s.as_str())
            .collect();

        // Per-table facts that need no cross-table information.
        for table in &mut self.tables {
            table.is_generic = generic_tables.contains(table.name.as_str());
            table.row_count_slack = settings.row_count_slack;

            for column in &mut table.columns {
                column.is_key_column = key_column_names.contains(column.name.as_str())
                    || (key_table.is_some() && column.referenced_table == key_table);
            }

            let mut by_ordinal: Vec<usize> = (0..table.columns.len()).collect();
            by_ordinal.sort_by_key(|&i| table.columns[i].ordinal_position);

            table.primary_key = by_ordinal
                .iter()
                .copied()
                .find(|&i| table.columns[i].is_primary_key() && table.columns[i].data_type != "date");
            table.key_column = by_ordinal
                .iter()
                .copied()
                .find(|&i| table.columns[i].is_key_column);

            table.fk_columns = by_ordinal
                .iter()
                .copied()
                .filter(|&i| table.columns[i].is_foreign_key())
                .collect();
            table.self_fk_columns = table
                .fk_columns
                .iter()
                .copied()
                .filter(|&i| table.columns[i].is_self_fk())
                .collect();
            table.not_self_fk_columns = table
                .fk_columns
                .iter()
                .copied()
                .filter(|&i| !table.columns[i].is_self_fk())
                .collect();
            table.unique_fk_columns = table
                .not_self_fk_columns
                .iter()
                .copied()
                .filter(|&i| table.columns[i].is_unique())
                .collect();
        }

        // The key-linked buckets read other tables, so compute them from an
        // immutable view first and assign afterwards.
        let mut buckets: Vec<(Vec<usize>, Vec<usize>, Vec<usize>, Vec<usize>)> =
            Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let to_key_tables: Vec<usize> = table
                .not_self_fk_columns
                .iter()
                .copied()
                .filter(|&i| {
                    table.columns[i]
                        .referenced_table
                        .is_some_and(|r| self.tables[r].with_key_column())
                })
                .collect();
            let unique_to_key_tables: Vec<usize> = table
                .unique_fk_columns
                .iter()
                .copied()
                .filter(|i| to_key_tables.contains(i))
                .collect();

            let references_key_adjacent = |i: usize| {
                table.columns[i].referenced_table.is_some_and(|r| {
                    self.tables[r].not_self_fk_columns.iter().any(|&j| {
                        self.tables[r].columns[j]
                            .referenced_table
                            .is_some_and(|rr| self.tables[rr].with_key_column())
                    })
                })
            };
            let to_key_adjacent: Vec<usize> = table
                .not_self_fk_columns
                .iter()
                .copied()
                .filter(|&i| references_key_adjacent(i))
                .collect();
            let unique_to_key_adjacent: Vec<usize> = table
                .unique_fk_columns
                .iter()
                .copied()
                .filter(|&i| references_key_adjacent(i))
                .collect();

            buckets.push((
                to_key_tables,
                unique_to_key_tables,
                to_key_adjacent,
                unique_to_key_adjacent,
            ));
        }

        for (table, (to_key, unique_to_key, adjacent, unique_adjacent)) in
            self.tables.iter_mut().zip(buckets)
        {
            table.highest_priority_fk_columns = if !unique_to_key.is_empty() {
                unique_to_key.clone()
            } else if !unique_adjacent.is_empty() || !to_key.is_empty() {
                let mut columns = unique_adjacent.clone();
                for i in &to_key {
                    if !columns.contains(i) {
                        columns.push(*i);
                    }
                }
                columns
            } else if !adjacent.is_empty() {
                adjacent.clone()
            } else {
                table.not_self_fk_columns.clone()
            };
            table.fk_columns_to_key_tables = to_key;
            table.unique_fk_columns_to_key_tables = unique_to_key;
            table.fk_columns_to_key_adjacent = adjacent;
            table.unique_fk_columns_to_key_adjacent = unique_adjacent;
        }
    }

    pub fn tables_without_generics(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| !t.is_generic)
    }

    pub fn tables_with_key_column(&self) -> Vec<TableId> {
        self.tables_without_generics()
            .filter(|t| t.with_key_column())
            .map(|t| t.id)
            .collect()
    }

    /// Promote every table visited by the finished stage.
    pub fn promote_checked(&self) {
        for table in &self.tables {
            if table.is_checked() && !table.is_ready_for_transferring() {
                table.set_ready_for_transferring();
            }
        }
    }
}
