use sea_orm_migration::prelude::*;

pub use crate::services::wastage::LENGTH_SCALE;

/// Digits kept for a length column. SQLite rejects anything wider than 16.
pub const LENGTH_PRECISION: u32 = 16;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_items_table::Migration),
            Box::new(m20240301_000002_create_drums_table::Migration),
            Box::new(m20240301_000003_create_drum_usages_table::Migration),
            Box::new(m20240301_000004_create_drum_history_table::Migration),
            Box::new(m20240301_000005_create_monthly_usage_summaries_table::Migration),
        ]
    }
}

mod m20240301_000001_create_items_table {
    use sea_orm_migration::prelude::*;
    use super::{LENGTH_PRECISION, LENGTH_SCALE};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Items::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Items::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Items::Name).string().not_null())
                        .col(
                            ColumnDef::new(Items::CurrentStock)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Items::DrumSize)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .null(),
                        )
                        .col(ColumnDef::new(Items::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Items::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Items::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Items {
        Table,
        Id,
        Name,
        CurrentStock,
        DrumSize,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_drums_table {
    use sea_orm_migration::prelude::*;
    use super::{LENGTH_PRECISION, LENGTH_SCALE};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_drums_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Drums::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Drums::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Drums::DrumNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Drums::ItemId).uuid().null())
                        .col(
                            ColumnDef::new(Drums::InitialQuantity)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Drums::CurrentQuantity)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Drums::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Drums::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Drums::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_drums_item_id")
                        .table(Drums::Table)
                        .col(Drums::ItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Drums::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Drums {
        Table,
        Id,
        DrumNumber,
        ItemId,
        InitialQuantity,
        CurrentQuantity,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_drum_usages_table {
    use sea_orm_migration::prelude::*;
    use super::{LENGTH_PRECISION, LENGTH_SCALE};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_drum_usages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DrumUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DrumUsages::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DrumUsages::DrumId).uuid().not_null())
                        .col(
                            ColumnDef::new(DrumUsages::LineDetailsId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::QuantityUsed)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::WastageCalculated)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::CableStartPoint)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::CableEndPoint)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::UsageDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DrumUsages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_drum_usages_line_details_id")
                        .table(DrumUsages::Table)
                        .col(DrumUsages::LineDetailsId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_drum_usages_drum_id")
                        .table(DrumUsages::Table)
                        .col(DrumUsages::DrumId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DrumUsages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DrumUsages {
        Table,
        Id,
        DrumId,
        LineDetailsId,
        QuantityUsed,
        WastageCalculated,
        CableStartPoint,
        CableEndPoint,
        UsageDate,
        CreatedAt,
    }
}

mod m20240301_000004_create_drum_history_table {
    use sea_orm_migration::prelude::*;
    use super::{LENGTH_PRECISION, LENGTH_SCALE};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_drum_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DrumHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DrumHistory::Id)
                                .integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DrumHistory::DrumId).uuid().not_null())
                        .col(ColumnDef::new(DrumHistory::Action).string_len(32).not_null())
                        .col(
                            ColumnDef::new(DrumHistory::PreviousQuantity)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DrumHistory::NewQuantity)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DrumHistory::QuantityChange)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DrumHistory::PreviousStatus)
                                .string_len(16)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DrumHistory::NewStatus)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DrumHistory::LineDetailsId).string().null())
                        .col(
                            ColumnDef::new(DrumHistory::SyncConnectionId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(DrumHistory::Notes).text().null())
                        .col(
                            ColumnDef::new(DrumHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_drum_history_drum_id")
                        .table(DrumHistory::Table)
                        .col(DrumHistory::DrumId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DrumHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DrumHistory {
        Table,
        Id,
        DrumId,
        Action,
        PreviousQuantity,
        NewQuantity,
        QuantityChange,
        PreviousStatus,
        NewStatus,
        LineDetailsId,
        SyncConnectionId,
        Notes,
        CreatedAt,
    }
}

mod m20240301_000005_create_monthly_usage_summaries_table {
    use sea_orm_migration::prelude::*;
    use super::{LENGTH_PRECISION, LENGTH_SCALE};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_monthly_usage_summaries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MonthlyUsageSummaries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::ItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::Month)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::Year)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::TotalUsed)
                                .decimal_len(LENGTH_PRECISION, LENGTH_SCALE)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(MonthlyUsageSummaries::LastSyncedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_monthly_usage_item_period")
                        .table(MonthlyUsageSummaries::Table)
                        .col(MonthlyUsageSummaries::ItemId)
                        .col(MonthlyUsageSummaries::Month)
                        .col(MonthlyUsageSummaries::Year)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MonthlyUsageSummaries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MonthlyUsageSummaries {
        Table,
        Id,
        ItemId,
        Month,
        Year,
        TotalUsed,
        LastSyncedAt,
    }
}
