use cucumber::given;

use crate::{cucumber::OrderWorld, support::TestShop};

#[given("a fresh install")]
async fn fresh_database(world: &mut OrderWorld) {
    world.shop = Some(TestShop::new().await);
}

#[given(expr = "product {string} priced at {int} with {int} in stock")]
async fn product_in_stock(world: &mut OrderWorld, sku: String, price: i64, stock: i64) {
    let product = world.shop().product(&sku, price, stock).await;
    world.products.insert(sku, product);
}
