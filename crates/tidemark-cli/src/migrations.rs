//! Schema history of the application, registered in code.
//!
//! Each entry pairs a forward change with its reverse. New schema changes go at
//! the bottom with a later timestamp; never edit one that has shipped.

use tidemark_common::Result;
use tidemark_db::{ColumnDef, ColumnType, Registry, SchemaMutator, TableDef};

pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register(
        "2022_12_20_101500_create_users_table",
        create_users,
        |schema: &dyn SchemaMutator| schema.drop_table("users"),
    )?;
    registry.register(
        "2022_12_27_211654_add_categories_table",
        create_categories,
        |schema: &dyn SchemaMutator| schema.drop_table("categories"),
    )?;
    registry.register(
        "2023_01_15_234907_add_topics_table",
        create_topics,
        |schema: &dyn SchemaMutator| schema.drop_table("topics"),
    )?;
    registry.register(
        "2023_01_16_144259_add_links_table",
        create_links,
        |schema: &dyn SchemaMutator| schema.drop_table("links"),
    )?;
    registry.register(
        "2023_01_16_160250_add_fields_to_user",
        add_user_profile_fields,
        drop_user_profile_fields,
    )?;
    Ok(registry)
}

fn create_users(schema: &dyn SchemaMutator) -> Result<()> {
    let mut table = TableDef::new("users");
    table.id();
    table.string("name", 255);
    table.string("email", 255).nullable().unique();
    table.string("phone", 20).nullable().unique();
    table.string("password", 255).nullable();
    table.timestamps();
    table.index(&["name"]);
    schema.create_table(&table)
}

fn create_categories(schema: &dyn SchemaMutator) -> Result<()> {
    let mut table = TableDef::new("categories");
    table.id();
    table.string("name", 255);
    table.string("description", 255).nullable();
    table.timestamps();
    table.index(&["name"]);
    schema.create_table(&table)
}

fn create_topics(schema: &dyn SchemaMutator) -> Result<()> {
    let mut table = TableDef::new("topics");
    table.id();
    table.string("title", 255);
    table.text("body");
    table.big_integer("user_id");
    table.big_integer("category_id");
    table.timestamps();
    table.index(&["title"]);
    table.index(&["user_id"]);
    table.index(&["category_id"]);
    table.foreign("user_id", "users", "id");
    table.foreign("category_id", "categories", "id");
    schema.create_table(&table)
}

fn create_links(schema: &dyn SchemaMutator) -> Result<()> {
    let mut table = TableDef::new("links");
    table.id();
    table.string("name", 255);
    table.string("url", 255).nullable();
    table.timestamps();
    schema.create_table(&table)
}

fn profile_fields() -> [ColumnDef; 3] {
    let mut city = ColumnDef::new("city", ColumnType::String(10));
    city.nullable();
    let mut introduction = ColumnDef::new("introduction", ColumnType::String(255));
    introduction.nullable();
    let mut avatar = ColumnDef::new("avatar", ColumnType::String(255));
    avatar.nullable().default("NULL");
    [city, introduction, avatar]
}

fn add_user_profile_fields(schema: &dyn SchemaMutator) -> Result<()> {
    for column in profile_fields() {
        if !schema.has_column("users", &column.name)? {
            schema.add_column("users", &column)?;
        }
    }
    Ok(())
}

fn drop_user_profile_fields(schema: &dyn SchemaMutator) -> Result<()> {
    for column in profile_fields() {
        if schema.has_column("users", &column.name)? {
            schema.drop_column("users", &column.name)?;
        }
    }
    Ok(())
}
