//! Drum registry and item catalog.
//!
//! Functions take any `ConnectionTrait` so the coordinator can run them
//! inside its unit of work. Quantity writes here never touch history;
//! callers append exactly one row per change.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::info;
use uuid::Uuid;

use crate::db::transaction::for_update;
use crate::entities::{
    drum::{self, DrumStatus, Entity as Drum},
    drum_history::HistoryAction,
    item::{self, Entity as Item},
};
use crate::errors::ServiceError;
use crate::services::history::{self, HistoryEntry};
use crate::services::wastage::DEFAULT_DRUM_CAPACITY;

/// Options for `find_or_create`.
#[derive(Debug, Clone, Default)]
pub struct DrumOptions {
    pub item_id: Option<Uuid>,
    pub initial_quantity: Option<Decimal>,
    /// Recorded on the `created` history row when the drum comes from a sync.
    pub sync_connection_id: Option<String>,
}

pub async fn create_item<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    drum_size: Option<Decimal>,
    current_stock: Decimal,
) -> Result<item::Model, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::ValidationError(
            "Item name must not be empty".to_string(),
        ));
    }
    if current_stock < Decimal::ZERO || drum_size.is_some_and(|size| size < Decimal::ZERO) {
        return Err(ServiceError::InvalidQuantity(format!(
            "Item {} cannot carry negative stock or drum size",
            name
        )));
    }

    let now = Utc::now();
    let item = item::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        current_stock: Set(current_stock),
        drum_size: Set(drum_size),
        created_at: Set(now),
        updated_at: Set(now),
    };
    item.insert(conn).await.map_err(ServiceError::db_error)
}

pub async fn get_item<C: ConnectionTrait>(conn: &C, item_id: Uuid) -> Result<item::Model, ServiceError> {
    Item::find_by_id(item_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))
}

pub async fn get_drum<C: ConnectionTrait>(conn: &C, drum_id: Uuid) -> Result<drum::Model, ServiceError> {
    Drum::find_by_id(drum_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::DrumNotFound(drum_id.to_string()))
}

pub async fn find_by_number<C: ConnectionTrait>(
    conn: &C,
    drum_number: &str,
) -> Result<Option<drum::Model>, ServiceError> {
    Drum::find()
        .filter(drum::Column::DrumNumber.eq(drum_number))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Loads a drum for read-modify-write inside a unit of work.
pub async fn lock_by_number<C: ConnectionTrait>(
    conn: &C,
    drum_number: &str,
) -> Result<drum::Model, ServiceError> {
    for_update(
        conn,
        Drum::find().filter(drum::Column::DrumNumber.eq(drum_number)),
    )
    .one(conn)
    .await
    .map_err(ServiceError::db_error)?
    .ok_or_else(|| ServiceError::DrumNotFound(drum_number.to_string()))
}

pub async fn lock_by_id<C: ConnectionTrait>(conn: &C, drum_id: Uuid) -> Result<drum::Model, ServiceError> {
    for_update(conn, Drum::find_by_id(drum_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::DrumNotFound(drum_id.to_string()))
}

/// All drums ordered by drum number.
pub async fn list_drums<C: ConnectionTrait>(conn: &C) -> Result<Vec<drum::Model>, ServiceError> {
    Drum::find()
        .order_by_asc(drum::Column::DrumNumber)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Drums still holding cable but at or under `threshold` meters.
pub async fn list_low_quantity<C: ConnectionTrait>(
    conn: &C,
    threshold: Decimal,
) -> Result<Vec<drum::Model>, ServiceError> {
    Drum::find()
        .filter(drum::Column::CurrentQuantity.gt(Decimal::ZERO))
        .filter(drum::Column::CurrentQuantity.lte(threshold))
        .order_by_asc(drum::Column::CurrentQuantity)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn list_for_item<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<Vec<drum::Model>, ServiceError> {
    for_update(
        conn,
        Drum::find().filter(drum::Column::ItemId.eq(item_id)),
    )
    .order_by_asc(drum::Column::DrumNumber)
    .all(conn)
    .await
    .map_err(ServiceError::db_error)
}

/// Returns the drum numbered `drum_number`, creating it if needed.
///
/// Capacity comes from `opts.initial_quantity`, then the item's drum size,
/// then `DEFAULT_DRUM_CAPACITY`. A new drum gets one `created` history row.
/// The boolean is true when the drum was created by this call.
pub async fn find_or_create<C: ConnectionTrait>(
    conn: &C,
    drum_number: &str,
    opts: &DrumOptions,
) -> Result<(drum::Model, bool), ServiceError> {
    let drum_number = drum_number.trim();
    if drum_number.is_empty() {
        return Err(ServiceError::ValidationError(
            "Drum number must not be empty".to_string(),
        ));
    }

    if let Some(existing) = find_by_number(conn, drum_number).await? {
        return Ok((existing, false));
    }

    let item = match opts.item_id {
        Some(item_id) => Some(get_item(conn, item_id).await?),
        None => None,
    };
    let capacity = opts
        .initial_quantity
        .or_else(|| item.as_ref().and_then(|item| item.drum_size))
        .unwrap_or(DEFAULT_DRUM_CAPACITY);
    if capacity < Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "Drum {} cannot start with {}m",
            drum_number, capacity
        )));
    }

    let status = if capacity > Decimal::ZERO {
        DrumStatus::Active
    } else {
        DrumStatus::Empty
    };
    let now = Utc::now();
    let drum = drum::ActiveModel {
        id: Set(Uuid::new_v4()),
        drum_number: Set(drum_number.to_string()),
        item_id: Set(opts.item_id),
        initial_quantity: Set(capacity),
        current_quantity: Set(capacity),
        status: Set(status),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    history::append(
        conn,
        HistoryEntry::new(drum.id, HistoryAction::Created, None, capacity, None, status)
            .with_sync_connection(opts.sync_connection_id.clone())
            .with_notes(format!("Drum {} created with {}m", drum_number, capacity.normalize())),
    )
    .await?;

    info!(drum_number = %drum.drum_number, capacity = %capacity, "Drum created");
    Ok((drum, true))
}

/// Writes a new quantity onto an already loaded drum.
///
/// The status is re-derived from `low_threshold` unless `new_status` is
/// given. Empty is forced whenever the quantity reaches zero.
pub async fn set_quantity<C: ConnectionTrait>(
    conn: &C,
    drum: drum::Model,
    new_quantity: Decimal,
    new_status: Option<DrumStatus>,
    low_threshold: Decimal,
) -> Result<drum::Model, ServiceError> {
    if new_quantity < Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "Drum {} cannot hold {}m",
            drum.drum_number,
            new_quantity.normalize()
        )));
    }

    let status = match new_status {
        Some(_) if new_quantity <= Decimal::ZERO => DrumStatus::Empty,
        Some(status) => status,
        None => DrumStatus::derive(new_quantity, drum.status, low_threshold),
    };

    let mut active: drum::ActiveModel = drum.into();
    active.current_quantity = Set(new_quantity);
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Sets a drum's quantity by id. Returns the drum as it was and as it is.
pub async fn adjust_quantity<C: ConnectionTrait>(
    conn: &C,
    drum_id: Uuid,
    new_quantity: Decimal,
    new_status: Option<DrumStatus>,
    low_threshold: Decimal,
) -> Result<(drum::Model, drum::Model), ServiceError> {
    if new_quantity < Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "Drum {} cannot hold {}m",
            drum_id,
            new_quantity.normalize()
        )));
    }
    let previous = lock_by_id(conn, drum_id).await?;
    let updated = set_quantity(conn, previous.clone(), new_quantity, new_status, low_threshold).await?;
    Ok((previous, updated))
}

pub async fn set_status<C: ConnectionTrait>(
    conn: &C,
    drum: drum::Model,
    status: DrumStatus,
) -> Result<drum::Model, ServiceError> {
    let mut active: drum::ActiveModel = drum.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Applies a signed delta to an item's stock, flooring at zero.
/// Returns the stock before and after.
pub async fn adjust_item_stock<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    delta: Decimal,
) -> Result<(Decimal, Decimal), ServiceError> {
    let item = for_update(conn, Item::find_by_id(item_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))?;

    let previous = item.current_stock;
    let updated = (previous + delta).max(Decimal::ZERO);
    set_item_stock(conn, item, updated).await?;
    Ok((previous, updated))
}

pub async fn set_item_stock<C: ConnectionTrait>(
    conn: &C,
    item: item::Model,
    stock: Decimal,
) -> Result<item::Model, ServiceError> {
    let mut active: item::ActiveModel = item.into();
    active.current_stock = Set(stock.max(Decimal::ZERO));
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)
}

/// Every catalog item, locked for a stock rewrite.
pub async fn lock_items<C: ConnectionTrait>(conn: &C) -> Result<Vec<item::Model>, ServiceError> {
    for_update(conn, Item::find().order_by_asc(item::Column::Name))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}
