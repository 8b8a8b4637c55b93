//! Table and column definitions rendered to SQLite DDL.
//!
//! Migrations describe tables with [`TableDef`] and hand them to a
//! [`SchemaMutator`](crate::SchemaMutator); the ledger describes its own table the same way.

/// Quote an identifier for use in a SQLite statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    Id,
    Integer,
    BigInteger,
    String(u32),
    Text,
    Boolean,
    Timestamp,
}

impl ColumnType {
    fn sql(&self) -> String {
        match self {
            ColumnType::Id => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::String(len) => format!("VARCHAR({len})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

/// A single column. Columns are `NOT NULL` unless marked [`nullable`](ColumnDef::nullable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// Raw SQL literal, e.g. `0` or `'draft'`.
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            unique: false,
            default: None,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn default(&mut self, literal: impl Into<String>) -> &mut Self {
        self.default = Some(literal.into());
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type.sql());
        if self.column_type != ColumnType::Id {
            if !self.nullable {
                sql.push_str(" NOT NULL");
            }
            if self.unique {
                sql.push_str(" UNIQUE");
            }
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// A table to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDef {
        self.columns.push(ColumnDef::new(name, column_type));
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    /// `id INTEGER PRIMARY KEY AUTOINCREMENT`
    pub fn id(&mut self) -> &mut ColumnDef {
        self.column("id", ColumnType::Id)
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, ColumnType::BigInteger)
    }

    pub fn string(&mut self, name: &str, len: u32) -> &mut ColumnDef {
        self.column(name, ColumnType::String(len))
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, ColumnType::Text)
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, ColumnType::Boolean)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDef {
        self.column(name, ColumnType::Timestamp)
    }

    /// Nullable, indexed `created_at` and `updated_at` columns.
    pub fn timestamps(&mut self) -> &mut Self {
        self.timestamp("created_at").nullable();
        self.timestamp("updated_at").nullable();
        self.index(&["created_at"]);
        self.index(&["updated_at"]);
        self
    }

    pub fn index(&mut self, columns: &[&str]) -> &mut Self {
        self.indexes.push(IndexDef {
            name: format!("idx_{}_{}", self.name, columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn foreign(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.foreign_keys.push(ForeignKeyDef {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
        });
        self
    }

    /// `CREATE TABLE` followed by one `CREATE INDEX` per index.
    pub fn create_statements(&self) -> Vec<String> {
        let mut definitions: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        definitions.extend(self.foreign_keys.iter().map(|fk| {
            format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&fk.column),
                quote_ident(&fk.references_table),
                quote_ident(&fk.references_column)
            )
        }));
        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(&self.name),
            definitions.join(",\n    ")
        )];

        for index in &self.indexes {
            let columns = index
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            statements.push(format!(
                "CREATE INDEX {} ON {} ({})",
                quote_ident(&index.name),
                quote_ident(&self.name),
                columns
            ));
        }
        statements
    }
}
