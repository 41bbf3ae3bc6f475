//! Property-based test generators using proptest.
//!
//! Provides strategies for generating products, write sequences and raw
//! `test_decoding` column tokens.

use crate::service::Product;
use proptest::prelude::*;

/// Strategy for text that needs quoting in `test_decoding` output:
/// quotes, separators, brackets and colons included.
pub fn awkward_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ',:\\[\\].]{0,24}").expect("Invalid regex")
}

/// Strategy for column names.
pub fn column_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for prices with two decimals.
pub fn price_strategy() -> impl Strategy<Value = f64> {
    (0u32..1_000_000).prop_map(|cents| f64::from(cents) / 100.0)
}

/// Strategy for products without id.
pub fn product_strategy() -> impl Strategy<Value = Product> {
    (
        awkward_text_strategy(),
        prop::option::of(awkward_text_strategy()),
        prop::option::of(awkward_text_strategy()),
        prop::option::of(1i64..50),
        prop::option::of(1i64..50),
        prop::option::of(price_strategy()),
    )
        .prop_map(
            |(name, description, brand, category_id, owner_id, price)| Product {
                id: None,
                name: Some(name),
                description,
                brand,
                category_id,
                owner_id,
                price,
                updated: None,
            },
        )
}

/// One write against the product table.
#[derive(Debug, Clone)]
pub enum ProductCommand {
    /// Insert a new product.
    Create(Product),
    /// Overwrite the n-th live product, modulo the live count.
    Update(usize, Product),
    /// Delete the n-th live product, modulo the live count.
    Delete(usize),
}

/// Strategy for sequences of product writes.
pub fn product_commands_strategy(max_len: usize) -> impl Strategy<Value = Vec<ProductCommand>> {
    let command = prop_oneof![
        3 => product_strategy().prop_map(ProductCommand::Create),
        2 => (any::<usize>(), product_strategy())
            .prop_map(|(n, product)| ProductCommand::Update(n, product)),
        1 => any::<usize>().prop_map(ProductCommand::Delete),
    ];
    prop::collection::vec(command, 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_products_have_names() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let product = product_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(product.id.is_none());
            assert!(product.name.is_some());
        }
    }
}
