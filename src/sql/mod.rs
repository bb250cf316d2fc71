//! SQL statement construction. Everything the engine sends to either
//! database is built here as a string; selection statements come out of
//! [`SelectionBuilder`], the fixed statements (FDW plumbing, truncation,
//! triggers, sequences, the copy itself) out of the free functions below.

use itertools::Itertools;
use std::collections::{BTreeSet, HashSet};

use crate::config::Settings;
use crate::constants::{CHUNK_SIZE, FDW_SERVER_NAME, STAGING_SCHEMA};
use crate::schema::{Column, PkValue, Table};

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Format an IN-list for `column`: bare literals for numeric types,
/// quoted-and-escaped literals for everything else.
pub fn format_ids<'v, I>(column: &Column, ids: I) -> String
where
    I: IntoIterator<Item = &'v PkValue>,
{
    let numeric = column.is_numeric();
    ids.into_iter()
        .map(|v| {
            if numeric {
                v.to_string()
            } else {
                quote_literal(&v.to_string())
            }
        })
        .join(", ")
}

/// The select target: non-numeric columns are cast to text so every value
/// decodes into the engine's integer-or-text domain.
fn select_target(column: &Column) -> String {
    if column.is_numeric() {
        quote_ident(&column.name)
    } else {
        format!("{}::text", quote_ident(&column.name))
    }
}

/// Builds the parameterised selection statements that drive the closure.
///
/// A WHERE clause is the conjunction of three independent sources: the
/// tenant predicate (when the table carries the key column), a primary-key
/// restriction, and per-column foreign conditions. Oversized IN-lists are
/// split at the chunk bound; when several conditions split at once, one
/// statement is produced per combination of their chunks.
#[derive(Debug, Clone)]
pub struct SelectionBuilder {
    chunk_size: usize,
    key_column_names: HashSet<String>,
    tenant_values: Vec<i64>,
}

impl SelectionBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            key_column_names: settings.key_column_names.iter().cloned().collect(),
            tenant_values: settings.key_column_values.clone(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn column_values_queries(
        &self,
        table: &Table,
        column: &Column,
        primary_key_values: &BTreeSet<PkValue>,
        where_columns: &[(&Column, &BTreeSet<PkValue>)],
        is_revert: bool,
    ) -> Vec<String> {
        let mut condition_lists: Vec<Vec<String>> = Vec::new();

        for (condition_column, ids) in where_columns {
            // Tenant scoping is handled by the tenant predicate, never by a
            // foreign condition.
            if self.key_column_names.contains(&condition_column.name) {
                continue;
            }
            let ident = quote_ident(&condition_column.name);
            if ids.is_empty() {
                condition_lists.push(vec![format!("{ident} IS NULL")]);
                continue;
            }
            let mut fragments = Vec::new();
            for chunk in &ids.iter().chunks(self.chunk_size) {
                let ids_str = format_ids(condition_column, chunk);
                if is_revert {
                    fragments.push(format!("{ident} IN ({ids_str})"));
                } else {
                    fragments.push(format!("({ident} IN ({ids_str}) OR {ident} IS NULL)"));
                }
            }
            condition_lists.push(fragments);
        }

        let combinations = combine_conditions(condition_lists);

        let mut queries = Vec::new();
        if combinations.is_empty() {
            if let Some(sql) = self.statement(table, column, primary_key_values, &[]) {
                queries.push(sql);
            }
        } else {
            for combination in combinations {
                if let Some(sql) = self.statement(table, column, primary_key_values, &combination)
                {
                    queries.push(sql);
                }
            }
        }
        queries
    }

    fn statement(
        &self,
        table: &Table,
        column: &Column,
        primary_key_values: &BTreeSet<PkValue>,
        fragments: &[String],
    ) -> Option<String> {
        let filtered: Vec<&String> = fragments.iter().filter(|f| f.as_str() != "1").collect();
        // A combination made only of tautologies selects everything; such a
        // probe is never executed.
        if filtered.is_empty() && !fragments.is_empty() {
            return None;
        }

        let mut conjuncts: Vec<String> = filtered.into_iter().cloned().collect();

        if !primary_key_values.is_empty()
            && let Some(pk) = table.primary_key_column()
        {
            conjuncts.push(format!(
                "{} IN ({})",
                quote_ident(&pk.name),
                format_ids(pk, primary_key_values)
            ));
        }

        if let Some(key_column) = table.key_column_ref()
            && !self.tenant_values.is_empty()
        {
            let ident = quote_ident(&key_column.name);
            let values = self.tenant_values.iter().join(", ");
            conjuncts.push(format!("({ident} IN ({values}) OR {ident} IS NULL)"));
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_target(column),
            quote_ident(&table.name)
        );
        if !conjuncts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts.join(" AND "));
        }
        Some(sql)
    }
}

/// Combine per-column condition fragments into complete WHERE combinations.
/// Single-fragment conditions ride along with every combination; conditions
/// split into several chunks multiply out into the cartesian product.
fn combine_conditions(condition_lists: Vec<Vec<String>>) -> Vec<Vec<String>> {
    if condition_lists.is_empty() {
        return Vec::new();
    }
    let (singles, multiples): (Vec<_>, Vec<_>) =
        condition_lists.into_iter().partition(|list| list.len() == 1);
    let singles: Vec<String> = singles.into_iter().flatten().collect();

    if multiples.is_empty() {
        return vec![singles];
    }

    multiples
        .iter()
        .map(|list| list.iter().cloned())
        .multi_cartesian_product()
        .map(|mut combination| {
            combination.extend(singles.iter().cloned());
            combination
        })
        .collect()
}

// --- fixed statements -------------------------------------------------------

pub fn create_fdw_extension_sql() -> String {
    "CREATE EXTENSION postgres_fdw".to_string()
}

pub fn drop_fdw_extension_sql() -> String {
    "DROP EXTENSION IF EXISTS postgres_fdw CASCADE".to_string()
}

pub fn create_server_sql(host: &str, port: u16, dbname: &str) -> String {
    format!(
        "CREATE SERVER {FDW_SERVER_NAME} FOREIGN DATA WRAPPER postgres_fdw \
         OPTIONS (host {}, port {}, dbname {}, fetch_size {}, updatable 'false')",
        quote_literal(host),
        quote_literal(&port.to_string()),
        quote_literal(dbname),
        quote_literal(&CHUNK_SIZE.to_string()),
    )
}

pub fn create_user_mapping_sql(dst_user: &str, src_user: &str, src_password: &str) -> String {
    format!(
        "CREATE USER MAPPING FOR {} SERVER {FDW_SERVER_NAME} OPTIONS (user {}, password {})",
        quote_ident(dst_user),
        quote_literal(src_user),
        quote_literal(src_password),
    )
}

pub fn drop_user_mapping_sql(dst_user: &str) -> String {
    format!(
        "DROP USER MAPPING IF EXISTS FOR {} SERVER {}",
        quote_ident(dst_user),
        quote_ident(FDW_SERVER_NAME),
    )
}

pub fn create_staging_schema_sql(dst_user: &str) -> String {
    format!(
        "CREATE SCHEMA {} AUTHORIZATION {}",
        quote_ident(STAGING_SCHEMA),
        quote_ident(dst_user),
    )
}

pub fn drop_staging_schema_sql() -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(STAGING_SCHEMA))
}

pub fn import_foreign_schema_sql(src_schema: &str, table_names: &[String]) -> String {
    let tables = table_names.iter().map(|t| quote_ident(t)).join(", ");
    format!(
        "IMPORT FOREIGN SCHEMA {} LIMIT TO ({tables}) FROM SERVER {FDW_SERVER_NAME} \
         INTO {} OPTIONS (import_default 'true')",
        quote_ident(src_schema),
        quote_ident(STAGING_SCHEMA),
    )
}

pub fn truncate_sql(table_names: &[String]) -> String {
    let tables = table_names.iter().map(|t| quote_ident(t)).join(", ");
    format!("TRUNCATE {tables} CASCADE")
}

pub fn disable_triggers_sql() -> String {
    "UPDATE pg_trigger SET tgenabled = 'D'".to_string()
}

pub fn enable_triggers_sql() -> String {
    "UPDATE pg_trigger SET tgenabled = 'O'".to_string()
}

pub fn serial_sequence_sql(table_name: &str, pk_column_name: &str) -> String {
    format!(
        "SELECT pg_get_serial_sequence({}, {})",
        quote_literal(&quote_ident(table_name)),
        quote_literal(pk_column_name),
    )
}

pub fn set_sequence_value_sql(sequence_name: &str, value: i64) -> String {
    format!("SELECT setval({}, {value})", quote_literal(sequence_name))
}

/// Row count plus maximum primary key in one pass. The maximum is only
/// meaningful for numeric keys; otherwise the count stands in so the row
/// shape stays fixed.
pub fn count_table_records_sql(table: &Table) -> Option<String> {
    let pk = table.primary_key_column()?;
    let max_expr = if pk.is_numeric() {
        format!("max({})::bigint", quote_ident(&pk.name))
    } else {
        "count(*)::bigint".to_string()
    };
    Some(format!(
        "SELECT count(*)::bigint, {max_expr} FROM {}",
        quote_ident(&table.name)
    ))
}

/// The physical copy: pull one chunk of rows for `table` out of the
/// imported staging schema into the destination's public schema.
pub fn transfer_records_sql<'v, I>(table: &Table, primary_key_values: I) -> Option<String>
where
    I: IntoIterator<Item = &'v PkValue>,
{
    let pk = table.primary_key_column()?;
    let columns = table.columns_list_sql();
    let table_ident = quote_ident(&table.name);
    let pk_condition = format!(
        "{}.{}.{} IN ({})",
        quote_ident(STAGING_SCHEMA),
        table_ident,
        quote_ident(&pk.name),
        format_ids(pk, primary_key_values),
    );
    Some(format!(
        "INSERT INTO \"public\".{table_ident} ({columns}) SELECT {columns} FROM {}.{table_ident} \
         WHERE {pk_condition} RETURNING {}",
        quote_ident(STAGING_SCHEMA),
        quote_ident(&pk.name),
    ))
}

/// Destination-side mapping of content types to table names.
pub fn content_type_table_sql() -> String {
    "SELECT \"table_name\"::text, \"app_label\"::text, \"model\"::text \
     FROM django_content_type_table"
        .to_string()
}

/// Source-side content type identifiers.
pub fn content_type_sql() -> String {
    "SELECT \"id\"::bigint, \"app_label\"::text, \"model\"::text FROM django_content_type"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConstraintKind, SchemaModel};
    use rstest::rstest;

    fn test_settings(tenants: &[i64], key_columns: &[&str]) -> Settings {
        Settings {
            key_table_name: "tenant".to_string(),
            key_column_names: key_columns.iter().map(|s| s.to_string()).collect(),
            key_column_values: tenants.to_vec(),
            ..Settings::default()
        }
    }

    /// tenant(id) <- org(id, tenant_id) <- task(id, org_id, label text pk? no)
    fn model() -> SchemaModel {
        let mut model = SchemaModel::new();
        let tenant = model.insert_table("tenant");
        let org = model.insert_table("org");
        let task = model.insert_table("task");
        model.append_column(
            tenant,
            "id",
            "integer",
            1,
            Some(tenant),
            Some(ConstraintKind::PrimaryKey),
        );
        model.append_column(
            org,
            "id",
            "integer",
            1,
            Some(org),
            Some(ConstraintKind::PrimaryKey),
        );
        model.append_column(
            org,
            "tenant_id",
            "integer",
            2,
            Some(tenant),
            Some(ConstraintKind::ForeignKey),
        );
        model.append_column(
            task,
            "id",
            "integer",
            1,
            Some(task),
            Some(ConstraintKind::PrimaryKey),
        );
        model.append_column(
            task,
            "org_id",
            "integer",
            2,
            Some(org),
            Some(ConstraintKind::ForeignKey),
        );
        model.append_column(task, "code", "character varying", 3, None, None);
        model.finalize(&test_settings(&[1], &["tenant_id"]));
        model
    }

    fn ints(values: &[i64]) -> BTreeSet<PkValue> {
        values.iter().copied().map(PkValue::Int).collect()
    }

    #[test]
    fn test_quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_tenant_predicate_applied_for_key_column_tables() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1, 2], &["tenant_id"]));
        let org = model.get("org").unwrap();
        let pk = org.primary_key_column().unwrap();

        let queries = builder.column_values_queries(org, pk, &BTreeSet::new(), &[], false);
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0],
            "SELECT \"id\" FROM \"org\" WHERE (\"tenant_id\" IN (1, 2) OR \"tenant_id\" IS NULL)"
        );
    }

    #[test]
    fn test_no_predicates_means_bare_select() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let task = model.get("task").unwrap();
        let pk = task.primary_key_column().unwrap();

        let queries = builder.column_values_queries(task, pk, &BTreeSet::new(), &[], false);
        assert_eq!(queries, vec!["SELECT \"id\" FROM \"task\"".to_string()]);
    }

    #[test]
    fn test_primary_key_restriction() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let task = model.get("task").unwrap();
        let org_id = task.column_by_name("org_id").unwrap();

        let queries =
            builder.column_values_queries(task, org_id, &ints(&[10, 11]), &[], false);
        assert_eq!(
            queries,
            vec!["SELECT \"org_id\" FROM \"task\" WHERE \"id\" IN (10, 11)".to_string()]
        );
    }

    #[test]
    fn test_forward_condition_allows_nulls_revert_does_not() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let task = model.get("task").unwrap();
        let pk = task.primary_key_column().unwrap();
        let org_id = task.column_by_name("org_id").unwrap();
        let allowed = ints(&[7]);

        let forward = builder.column_values_queries(
            task,
            pk,
            &BTreeSet::new(),
            &[(org_id, &allowed)],
            false,
        );
        assert_eq!(
            forward,
            vec![
                "SELECT \"id\" FROM \"task\" WHERE (\"org_id\" IN (7) OR \"org_id\" IS NULL)"
                    .to_string()
            ]
        );

        let revert = builder.column_values_queries(
            task,
            pk,
            &BTreeSet::new(),
            &[(org_id, &allowed)],
            true,
        );
        assert_eq!(
            revert,
            vec!["SELECT \"id\" FROM \"task\" WHERE \"org_id\" IN (7)".to_string()]
        );
    }

    #[test]
    fn test_empty_condition_degenerates_to_is_null() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let task = model.get("task").unwrap();
        let pk = task.primary_key_column().unwrap();
        let empty = BTreeSet::new();
        let org_id = task.column_by_name("org_id").unwrap();

        let queries =
            builder.column_values_queries(task, pk, &BTreeSet::new(), &[(org_id, &empty)], false);
        assert_eq!(
            queries,
            vec!["SELECT \"id\" FROM \"task\" WHERE \"org_id\" IS NULL".to_string()]
        );
    }

    #[test]
    fn test_key_named_conditions_are_dropped() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let org = model.get("org").unwrap();
        let pk = org.primary_key_column().unwrap();
        let tenant_id = org.column_by_name("tenant_id").unwrap();
        let allowed = ints(&[5]);

        // The foreign condition on the key column is skipped; only the
        // tenant predicate survives.
        let queries = builder.column_values_queries(
            org,
            pk,
            &BTreeSet::new(),
            &[(tenant_id, &allowed)],
            false,
        );
        assert_eq!(
            queries,
            vec![
                "SELECT \"id\" FROM \"org\" WHERE (\"tenant_id\" IN (1) OR \"tenant_id\" IS NULL)"
                    .to_string()
            ]
        );
    }

    #[rstest]
    #[case(1, 4)]
    #[case(2, 2)]
    #[case(10, 1)]
    fn test_chunked_condition_splits_into_queries(#[case] chunk: usize, #[case] expected: usize) {
        let model = model();
        let builder =
            SelectionBuilder::new(&test_settings(&[1], &["tenant_id"])).with_chunk_size(chunk);
        let task = model.get("task").unwrap();
        let pk = task.primary_key_column().unwrap();
        let allowed = ints(&[1, 2, 3, 4]);
        let org_id = task.column_by_name("org_id").unwrap();

        let queries = builder.column_values_queries(
            task,
            pk,
            &BTreeSet::new(),
            &[(org_id, &allowed)],
            true,
        );
        assert_eq!(queries.len(), expected);
        // Every id appears exactly once across the chunked statements.
        let joined = queries.join("\n");
        for id in 1..=4 {
            assert_eq!(joined.matches(&format!("{id}")).count(), 1);
        }
    }

    #[test]
    fn test_cartesian_combination_of_two_chunked_conditions() {
        let mut model = SchemaModel::new();
        let g = model.insert_table("generic");
        model.append_column(
            g,
            "id",
            "integer",
            1,
            Some(g),
            Some(ConstraintKind::PrimaryKey),
        );
        model.append_column(g, "object_id", "integer", 2, None, None);
        model.append_column(g, "kind_id", "integer", 3, None, None);
        model.finalize(&test_settings(&[1], &["tenant_id"]));

        let builder =
            SelectionBuilder::new(&test_settings(&[1], &["tenant_id"])).with_chunk_size(2);
        let table = model.get("generic").unwrap();
        let pk = table.primary_key_column().unwrap();
        let object_ids = ints(&[1, 2, 3, 4]); // 2 chunks
        let kind_ids = ints(&[7, 8, 9]); // 2 chunks

        let queries = builder.column_values_queries(
            table,
            pk,
            &BTreeSet::new(),
            &[
                (table.column_by_name("object_id").unwrap(), &object_ids),
                (table.column_by_name("kind_id").unwrap(), &kind_ids),
            ],
            true,
        );
        assert_eq!(queries.len(), 4, "2 chunks x 2 chunks");
        for query in &queries {
            assert!(query.contains("\"object_id\" IN ("));
            assert!(query.contains("\"kind_id\" IN ("));
        }
    }

    #[test]
    fn test_single_conditions_ride_along_every_combination() {
        let mut model = SchemaModel::new();
        let g = model.insert_table("generic");
        model.append_column(
            g,
            "id",
            "integer",
            1,
            Some(g),
            Some(ConstraintKind::PrimaryKey),
        );
        model.append_column(g, "object_id", "integer", 2, None, None);
        model.append_column(g, "kind_id", "integer", 3, None, None);
        model.finalize(&test_settings(&[1], &["tenant_id"]));

        let builder =
            SelectionBuilder::new(&test_settings(&[1], &["tenant_id"])).with_chunk_size(2);
        let table = model.get("generic").unwrap();
        let pk = table.primary_key_column().unwrap();
        let object_ids = ints(&[1, 2, 3, 4]); // chunked
        let kind_ids = ints(&[7]); // single

        let queries = builder.column_values_queries(
            table,
            pk,
            &BTreeSet::new(),
            &[
                (table.column_by_name("object_id").unwrap(), &object_ids),
                (table.column_by_name("kind_id").unwrap(), &kind_ids),
            ],
            true,
        );
        assert_eq!(queries.len(), 2);
        for query in &queries {
            assert!(query.contains("\"kind_id\" IN (7)"));
        }
    }

    #[test]
    fn test_text_ids_are_quoted_and_escaped() {
        let mut model = SchemaModel::new();
        let t = model.insert_table("doc");
        model.append_column(
            t,
            "code",
            "character varying",
            1,
            Some(t),
            Some(ConstraintKind::PrimaryKey),
        );
        model.finalize(&test_settings(&[1], &[]));

        let table = model.get("doc").unwrap();
        let pk = table.primary_key_column().unwrap();
        let values: BTreeSet<PkValue> = [
            PkValue::Text("a-1".to_string()),
            PkValue::Text("o'brien".to_string()),
        ]
        .into_iter()
        .collect();

        let builder = SelectionBuilder::new(&test_settings(&[1], &[]));
        let queries = builder.column_values_queries(table, pk, &values, &[], false);
        assert_eq!(
            queries,
            vec![
                "SELECT \"code\"::text FROM \"doc\" WHERE \"code\" IN ('a-1', 'o''brien')"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_tautology_fragments_are_dropped() {
        let model = model();
        let builder = SelectionBuilder::new(&test_settings(&[1], &["tenant_id"]));
        let task = model.get("task").unwrap();
        let pk = task.primary_key_column().unwrap();

        assert!(
            builder
                .statement(task, pk, &BTreeSet::new(), &["1".to_string(), "1".to_string()])
                .is_none()
        );

        let sql = builder
            .statement(
                task,
                pk,
                &BTreeSet::new(),
                &["1".to_string(), "\"org_id\" IN (3)".to_string()],
            )
            .unwrap();
        assert_eq!(sql, "SELECT \"id\" FROM \"task\" WHERE \"org_id\" IN (3)");
    }

    #[test]
    fn test_combine_conditions_shapes() {
        assert!(combine_conditions(vec![]).is_empty());
        assert_eq!(
            combine_conditions(vec![vec!["a".into()], vec!["b".into()]]),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        let combos = combine_conditions(vec![
            vec!["a1".into(), "a2".into()],
            vec!["b1".into(), "b2".into()],
            vec!["s".into()],
        ]);
        assert_eq!(combos.len(), 4);
        for combo in &combos {
            assert_eq!(combo.len(), 3);
            assert_eq!(combo[2], "s");
        }
    }

    #[test]
    fn test_transfer_sql_shape() {
        let model = model();
        let org = model.get("org").unwrap();
        let sql = transfer_records_sql(org, &ints(&[10, 11])).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"org\" (\"id\", \"tenant_id\") \
             SELECT \"id\", \"tenant_id\" FROM \"tmp_src_schema\".\"org\" \
             WHERE \"tmp_src_schema\".\"org\".\"id\" IN (10, 11) RETURNING \"id\""
        );
    }

    #[test]
    fn test_count_sql_uses_max_only_for_numeric_pk() {
        let model = model();
        let org = model.get("org").unwrap();
        assert_eq!(
            count_table_records_sql(org).unwrap(),
            "SELECT count(*)::bigint, max(\"id\")::bigint FROM \"org\""
        );

        let mut text_model = SchemaModel::new();
        let doc = text_model.insert_table("doc");
        text_model.append_column(
            doc,
            "code",
            "text",
            1,
            Some(doc),
            Some(ConstraintKind::PrimaryKey),
        );
        text_model.finalize(&test_settings(&[1], &[]));
        assert_eq!(
            count_table_records_sql(text_model.get("doc").unwrap()).unwrap(),
            "SELECT count(*)::bigint, count(*)::bigint FROM \"doc\""
        );
    }

    #[test]
    fn test_fdw_statements() {
        assert_eq!(
            create_server_sql("db.internal", 5432, "app"),
            "CREATE SERVER src_server FOREIGN DATA WRAPPER postgres_fdw \
             OPTIONS (host 'db.internal', port '5432', dbname 'app', \
             fetch_size '60000', updatable 'false')"
        );
        assert_eq!(
            create_user_mapping_sql("dst", "src", "p'w"),
            "CREATE USER MAPPING FOR \"dst\" SERVER src_server \
             OPTIONS (user 'src', password 'p''w')"
        );
        assert_eq!(
            import_foreign_schema_sql("public", &["a".to_string(), "b".to_string()]),
            "IMPORT FOREIGN SCHEMA \"public\" LIMIT TO (\"a\", \"b\") FROM SERVER src_server \
             INTO \"tmp_src_schema\" OPTIONS (import_default 'true')"
        );
    }

    #[test]
    fn test_sequence_statements() {
        assert_eq!(
            serial_sequence_sql("org", "id"),
            "SELECT pg_get_serial_sequence('\"org\"', 'id')"
        );
        assert_eq!(
            set_sequence_value_sql("org_id_seq", 100_042),
            "SELECT setval('org_id_seq', 100042)"
        );
    }

    #[test]
    fn test_truncate_sql() {
        assert_eq!(
            truncate_sql(&["a".to_string(), "b".to_string()]),
            "TRUNCATE \"a\", \"b\" CASCADE"
        );
    }
}
