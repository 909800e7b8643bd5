//! Query descriptors.
//!
//! A [`QueryDescriptor`] is the caller-built description of one statement.
//! It is plain data: cloning it yields an independent snapshot, which is
//! what query hooks receive. Rendering to SQL happens per dialect at
//! execution time, so the same descriptor runs against any connection.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};

/// Option marker requesting a total-count follow-up query.
pub const CALC_FOUND_ROWS: &str = "SQL_CALC_FOUND_ROWS";

/// Column alias of the value produced by a count query.
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: QueryParam,
}

/// Structured SELECT over a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Select these columns instead of `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add an AND-ed predicate. `value` is ignored for `IsNull`/`IsNotNull`.
    pub fn filter(
        mut self,
        column: impl Into<String>,
        op: FilterOp,
        value: impl Into<QueryParam>,
    ) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Caller-written SQL, bound with the descriptor's params.
    Raw(String),
    Select(Select),
    /// Total row count of the wrapped statement, ignoring LIMIT/OFFSET.
    Count(Box<Statement>),
}

/// SQL text and bindings ready for a specific dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    statement: Statement,
    params: Vec<QueryParam>,
    options: Vec<String>,
}

impl QueryDescriptor {
    /// Describe a raw SQL statement.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            statement: Statement::Raw(sql.into()),
            params: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Bind a positional parameter for a raw statement.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.push_option(option);
        self
    }

    pub fn push_option(&mut self, option: impl Into<String>) {
        let option = option.into();
        if !self.options.iter().any(|o| o.eq_ignore_ascii_case(&option)) {
            self.options.push(option);
        }
    }

    /// Request a total-count follow-up after this statement runs.
    pub fn with_total_count(self) -> Self {
        self.with_option(CALC_FOUND_ROWS)
    }

    pub fn wants_total_count(&self) -> bool {
        self.options
            .iter()
            .any(|o| o.eq_ignore_ascii_case(CALC_FOUND_ROWS))
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Rebuild this descriptor into the minimal count-only follow-up.
    pub fn count_query(&self) -> QueryDescriptor {
        let source = match &self.statement {
            Statement::Count(inner) => inner.as_ref().clone(),
            other => other.clone(),
        };
        QueryDescriptor {
            statement: Statement::Count(Box::new(source)),
            params: self.params.clone(),
            options: Vec::new(),
        }
    }

    /// Whether executing this descriptor yields a row set.
    pub fn returns_rows(&self) -> bool {
        match &self.statement {
            Statement::Select(_) | Statement::Count(_) => true,
            Statement::Raw(sql) => {
                let keyword = first_keyword(sql);
                matches!(
                    keyword.as_str(),
                    "SELECT" | "WITH" | "SHOW" | "PRAGMA" | "EXPLAIN" | "VALUES" | "DESCRIBE"
                        | "DESC"
                ) || sql.to_ascii_uppercase().contains(" RETURNING ")
            }
        }
    }

    /// Render SQL for `dialect`.
    pub fn render(&self, dialect: DatabaseType) -> DbResult<RenderedQuery> {
        match &self.statement {
            Statement::Raw(sql) => Ok(RenderedQuery {
                sql: self.render_raw(sql, dialect),
                params: self.params.clone(),
            }),
            Statement::Select(select) => {
                let mut params = Vec::new();
                let sql = render_select(select, &self.options, dialect, &mut params, false)?;
                Ok(RenderedQuery { sql, params })
            }
            Statement::Count(source) => self.render_count(source, dialect),
        }
    }

    fn render_raw(&self, sql: &str, dialect: DatabaseType) -> String {
        // MySQL select modifiers must follow the SELECT keyword
        if dialect != DatabaseType::MySQL || self.options.is_empty() {
            return sql.to_string();
        }
        let trimmed = sql.trim_start();
        let upper = trimmed.to_ascii_uppercase();
        if !upper.starts_with("SELECT") || first_keyword(trimmed) != "SELECT" {
            return sql.to_string();
        }
        let missing: Vec<&str> = self
            .options
            .iter()
            .filter(|o| !upper.contains(&o.to_ascii_uppercase()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return sql.to_string();
        }
        format!("SELECT {} {}", missing.join(" "), &trimmed[6..].trim_start())
    }

    fn render_count(&self, source: &Statement, dialect: DatabaseType) -> DbResult<RenderedQuery> {
        if dialect == DatabaseType::MySQL {
            // FOUND_ROWS() reads session state left by the primary statement
            return Ok(RenderedQuery {
                sql: format!("SELECT FOUND_ROWS() AS {}", COUNT_COLUMN),
                params: Vec::new(),
            });
        }
        match source {
            Statement::Select(select) => {
                let mut params = Vec::new();
                let sql = render_select(select, &[], dialect, &mut params, true)?;
                Ok(RenderedQuery { sql, params })
            }
            Statement::Raw(sql) => Ok(RenderedQuery {
                sql: format!(
                    "SELECT COUNT(*) AS {} FROM ({}) AS found_rows",
                    COUNT_COLUMN,
                    sql.trim().trim_end_matches(';')
                ),
                params: self.params.clone(),
            }),
            Statement::Count(inner) => self.render_count(inner, dialect),
        }
    }
}

impl From<Select> for QueryDescriptor {
    fn from(select: Select) -> Self {
        Self {
            statement: Statement::Select(select),
            params: Vec::new(),
            options: Vec::new(),
        }
    }
}

fn first_keyword(sql: &str) -> String {
    sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn check_identifier(ident: &str) -> DbResult<&str> {
    let valid = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(ident)
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid identifier '{}': only letters, digits, '_' and '.' are allowed",
            ident
        )))
    }
}

fn render_select(
    select: &Select,
    options: &[String],
    dialect: DatabaseType,
    params: &mut Vec<QueryParam>,
    count_only: bool,
) -> DbResult<String> {
    let mut sql = String::from("SELECT ");

    if count_only {
        sql.push_str(&format!("COUNT(*) AS {}", COUNT_COLUMN));
    } else {
        for option in options {
            let keep = dialect == DatabaseType::MySQL || option.eq_ignore_ascii_case("DISTINCT");
            if keep {
                sql.push_str(&option.to_ascii_uppercase());
                sql.push(' ');
            }
        }
        if select.columns.is_empty() {
            sql.push('*');
        } else {
            let columns = select
                .columns
                .iter()
                .map(|c| check_identifier(c))
                .collect::<DbResult<Vec<_>>>()?;
            sql.push_str(&columns.join(", "));
        }
    }

    sql.push_str(" FROM ");
    sql.push_str(check_identifier(&select.table)?);

    if !select.filters.is_empty() {
        let mut clauses = Vec::with_capacity(select.filters.len());
        for filter in &select.filters {
            let column = check_identifier(&filter.column)?;
            if filter.op.takes_value() {
                params.push(filter.value.clone());
                clauses.push(format!(
                    "{} {} {}",
                    column,
                    filter.op.as_sql(),
                    dialect.placeholder(params.len())
                ));
            } else {
                clauses.push(format!("{} {}", column, filter.op.as_sql()));
            }
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if count_only {
        return Ok(sql);
    }

    if !select.order_by.is_empty() {
        let order = select
            .order_by
            .iter()
            .map(|(column, order)| {
                let dir = match order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                check_identifier(column).map(|c| format!("{} {}", c, dir))
            })
            .collect::<DbResult<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    match (select.limit, select.offset) {
        (Some(limit), Some(offset)) => {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
        }
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => match dialect {
            DatabaseType::PostgreSQL => sql.push_str(&format!(" OFFSET {}", offset)),
            DatabaseType::SQLite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            DatabaseType::MySQL => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", u64::MAX, offset))
            }
        },
        (None, None) => {}
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_page() -> QueryDescriptor {
        QueryDescriptor::from(
            Select::from("users")
                .columns(["id", "name"])
                .filter("age", FilterOp::Ge, 18)
                .where_eq("status", "active")
                .order_by("id", SortOrder::Desc)
                .limit(10)
                .offset(20),
        )
    }

    #[test]
    fn test_render_select_sqlite() {
        let rendered = users_page().render(DatabaseType::SQLite).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT id, name FROM users WHERE age >= ? AND status = ? ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            rendered.params,
            vec![QueryParam::Int(18), QueryParam::String("active".into())]
        );
    }

    #[test]
    fn test_render_select_postgres_numbers_placeholders() {
        let rendered = users_page().render(DatabaseType::PostgreSQL).unwrap();
        assert!(rendered.sql.contains("age >= $1 AND status = $2"));
    }

    #[test]
    fn test_mysql_renders_found_rows_marker() {
        let rendered = users_page()
            .with_total_count()
            .render(DatabaseType::MySQL)
            .unwrap();
        assert!(rendered.sql.starts_with("SELECT SQL_CALC_FOUND_ROWS id, name FROM users"));

        // Only MySQL understands the marker
        let rendered = users_page()
            .with_total_count()
            .render(DatabaseType::SQLite)
            .unwrap();
        assert!(rendered.sql.starts_with("SELECT id, name"));
    }

    #[test]
    fn test_count_query_mysql_uses_found_rows() {
        let count = users_page().with_total_count().count_query();
        let rendered = count.render(DatabaseType::MySQL).unwrap();
        assert_eq!(rendered.sql, "SELECT FOUND_ROWS() AS count");
        assert!(rendered.params.is_empty());
        assert!(!count.wants_total_count());
    }

    #[test]
    fn test_count_query_drops_paging() {
        let rendered = users_page()
            .count_query()
            .render(DatabaseType::SQLite)
            .unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) AS count FROM users WHERE age >= ? AND status = ?"
        );
        assert_eq!(rendered.params.len(), 2);
    }

    #[test]
    fn test_count_query_wraps_raw_sql() {
        let raw = QueryDescriptor::raw("SELECT * FROM logs WHERE level = ? LIMIT 5;").bind("warn");
        let rendered = raw.count_query().render(DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(*) AS count FROM (SELECT * FROM logs WHERE level = ? LIMIT 5) AS found_rows"
        );
        assert_eq!(rendered.params, vec![QueryParam::String("warn".into())]);
    }

    #[test]
    fn test_count_of_count_does_not_nest() {
        let once = users_page().count_query();
        assert_eq!(once.count_query(), once);
    }

    #[test]
    fn test_raw_mysql_injects_options_after_select() {
        let raw = QueryDescriptor::raw("select * from t").with_total_count();
        let rendered = raw.render(DatabaseType::MySQL).unwrap();
        assert_eq!(rendered.sql, "SELECT SQL_CALC_FOUND_ROWS * from t");

        let already = QueryDescriptor::raw("SELECT SQL_CALC_FOUND_ROWS * FROM t").with_total_count();
        assert_eq!(
            already.render(DatabaseType::MySQL).unwrap().sql,
            "SELECT SQL_CALC_FOUND_ROWS * FROM t"
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let q = QueryDescriptor::from(Select::from("t").offset(5));
        assert_eq!(
            q.render(DatabaseType::SQLite).unwrap().sql,
            "SELECT * FROM t LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            q.render(DatabaseType::PostgreSQL).unwrap().sql,
            "SELECT * FROM t OFFSET 5"
        );
    }

    #[test]
    fn test_null_filters_bind_nothing() {
        let q = QueryDescriptor::from(Select::from("t").filter(
            "deleted_at",
            FilterOp::IsNull,
            QueryParam::Null,
        ));
        let rendered = q.render(DatabaseType::SQLite).unwrap();
        assert_eq!(rendered.sql, "SELECT * FROM t WHERE deleted_at IS NULL");
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn test_rejects_injected_identifier() {
        let q = QueryDescriptor::from(Select::from("users; DROP TABLE users"));
        assert!(matches!(
            q.render(DatabaseType::SQLite),
            Err(DbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_returns_rows() {
        assert!(QueryDescriptor::raw("  select 1").returns_rows());
        assert!(QueryDescriptor::raw("WITH x AS (SELECT 1) SELECT * FROM x").returns_rows());
        assert!(QueryDescriptor::raw("INSERT INTO t VALUES (1) RETURNING id").returns_rows());
        assert!(!QueryDescriptor::raw("UPDATE t SET a = 1").returns_rows());
        assert!(users_page().count_query().returns_rows());
    }

    #[test]
    fn test_options_deduplicate() {
        let mut q = QueryDescriptor::raw("SELECT 1").with_total_count();
        q.push_option("sql_calc_found_rows");
        assert_eq!(q.options().len(), 1);
        assert!(q.wants_total_count());
    }
}
