use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::SchemaManager;

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to database: {}", database_url);

    // Handle special SQLite URL formats
    let db = if database_url == "sqlite::memory:" {
        Database::connect(database_url)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        let path = std::path::Path::new(path_str);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbErr::Custom(format!("Failed to create DB directory: {}", e)))?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        if !path.exists() {
            std::fs::File::create(path)
                .map_err(|e| DbErr::Custom(format!("Failed to create DB file: {}", e)))?;
            tracing::info!("Created database file: {}", path.display());
        }

        let mut options = ConnectOptions::new(database_url);
        options.max_connections(max_connections);

        Database::connect(options)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else {
        return Err(DbErr::Custom("Invalid SQLite URL format".to_string()));
    };

    // Message cascade on conversation delete relies on this pragma
    db.execute_unprepared("PRAGMA foreign_keys = ON").await?;

    tracing::info!("Applying migrations...");
    let schema_manager = SchemaManager::new(&db);

    let already_migrated = schema_manager
        .has_table("seaql_migrations")
        .await
        .unwrap_or(false);

    if !already_migrated {
        tracing::info!("First run: executing all migration SQL files");

        let migrations = [
            include_str!("../../migrations/001_create_conversations.sql"),
            include_str!("../../migrations/002_create_messages.sql"),
        ];

        for (i, sql) in migrations.iter().enumerate() {
            db.execute_unprepared(sql).await?;
            tracing::info!("Applied migration {}", i + 1);
        }

        db.execute_unprepared(
            r#"
            CREATE TABLE IF NOT EXISTS seaql_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .await?;

        for i in 1..=migrations.len() {
            db.execute_unprepared(&format!(
                "INSERT INTO seaql_migrations (version) VALUES ('m20250801_{:08}')",
                i * 100000
            ))
            .await?;
        }
    } else {
        tracing::info!("Migrations already applied, skipping");
    }

    Ok(db)
}
