use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_table::Migration),
            Box::new(m20240601_000002_create_cart_items_table::Migration),
            Box::new(m20240601_000003_create_payment_intents_table::Migration),
            Box::new(m20240601_000004_create_feedback_table::Migration),
        ]
    }
}

mod m20240601_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).string().not_null())
                        .col(ColumnDef::new(Orders::Items).json().not_null())
                        .col(ColumnDef::new(Orders::Amount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Address).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Orders::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Orders::OrderCode).big_integer().null().unique_key())
                        .col(ColumnDef::new(Orders::PaymentInfo).json().null())
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
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
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_is_paid")
                        .table(Orders::Table)
                        .col(Orders::IsPaid)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        Items,
        Amount,
        Address,
        Status,
        IsPaid,
        OrderCode,
        PaymentInfo,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_cart_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_cart_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per (user, product); the composite key is the upsert target.
            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::UserId).string().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .name("pk_cart_items")
                                .col(CartItems::UserId)
                                .col(CartItems::ProductId),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        UserId,
        ProductId,
        Quantity,
        UpdatedAt,
    }
}

mod m20240601_000003_create_payment_intents_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_payment_intents_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentIntents::OrderCode)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::Description)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::CheckoutUrl).text().null())
                        .col(
                            ColumnDef::new(PaymentIntents::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::FailureReason).text().null())
                        .col(
                            ColumnDef::new(PaymentIntents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_intents_order")
                                .from(PaymentIntents::Table, PaymentIntents::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_order_id")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentIntents {
        Table,
        OrderCode,
        OrderId,
        AmountMinor,
        Description,
        CheckoutUrl,
        Status,
        FailureReason,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }
}

mod m20240601_000004_create_feedback_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_feedback_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Feedback::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Feedback::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Feedback::UserId).string().not_null())
                        .col(ColumnDef::new(Feedback::UserName).string().not_null())
                        .col(ColumnDef::new(Feedback::ProductId).integer().not_null())
                        .col(ColumnDef::new(Feedback::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Feedback::Rating).integer().not_null())
                        .col(ColumnDef::new(Feedback::Comment).text().not_null())
                        .col(
                            ColumnDef::new(Feedback::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Feedback::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_feedback_order")
                                .from(Feedback::Table, Feedback::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // One review per purchased product per order.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("ux_feedback_user_product_order")
                        .table(Feedback::Table)
                        .col(Feedback::UserId)
                        .col(Feedback::ProductId)
                        .col(Feedback::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_feedback_product_id")
                        .table(Feedback::Table)
                        .col(Feedback::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Feedback::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Feedback {
        Table,
        Id,
        UserId,
        UserName,
        ProductId,
        OrderId,
        Rating,
        Comment,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }
}
