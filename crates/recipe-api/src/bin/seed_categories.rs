//! Create recipe categories.
//!
//! Usage: `seed-categories [NAME ...]`. With no names the default set is
//! created. Existing categories are left untouched.

use recipe_db::Database;

const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Breakfast", "Morning meals and brunch"),
    ("Main Course", "Lunch and dinner dishes"),
    ("Appetizers", "Starters and small plates"),
    ("Desserts", "Sweets and baked treats"),
    ("Beverages", "Drinks, shakes and smoothies"),
    ("Snacks", "Quick bites"),
    ("Salads", "Fresh and healthy bowls"),
    ("Soups", "Soups and stews"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db = Database::from_env().await?;
    let categories = db.categories();

    let requested: Vec<String> = std::env::args().skip(1).collect();
    let created = if requested.is_empty() {
        let mut created = Vec::with_capacity(DEFAULT_CATEGORIES.len());
        for (name, description) in DEFAULT_CATEGORIES {
            created.push(categories.get_or_create(name, Some(description)).await?);
        }
        created
    } else {
        let mut created = Vec::with_capacity(requested.len());
        for name in requested.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            created.push(categories.get_or_create(name, None).await?);
        }
        created
    };

    for category in &created {
        println!("seed-categories: {} ({})", category.name, category.id);
    }
    println!("seed-categories: ok, {} categories", created.len());
    Ok(())
}
