use bson::oid::ObjectId;
use bson::{Bson, doc};
use docscan::filter::{DegradeReason, FilterExpr as F, FilterTranslator};
use docscan::{ReadConfig, ScanError};

fn translate(filters: &[F]) -> bson::Document {
    FilterTranslator::default().translate(filters).unwrap()
}

#[test]
fn comparison_and_membership_map_to_native_operators() {
    assert_eq!(translate(&[F::eq("x", 1)]), doc! { "x": { "$eq": 1 } });
    assert_eq!(translate(&[F::gte("age", 18)]), doc! { "age": { "$gte": 18 } });
    assert_eq!(translate(&[F::is_in("tag", ["a", "b"])]), doc! { "tag": { "$in": ["a", "b"] } });
    assert_eq!(translate(&[F::is_null("deleted")]), doc! { "deleted": { "$eq": Bson::Null } });
    assert_eq!(translate(&[F::is_not_null("email")]), doc! { "email": { "$ne": Bson::Null } });
}

#[test]
fn top_level_filters_are_conjoined() {
    let q = translate(&[F::eq("a", 1), F::lt("b", 5), F::gt("b", 1)]);
    assert_eq!(q, doc! { "a": { "$eq": 1 }, "b": { "$lt": 5, "$gt": 1 } });
}

#[test]
fn empty_filter_list_matches_everything() {
    assert!(translate(&[]).is_empty());
}

#[test]
fn and_or_recurse_outside_negation() {
    let q = translate(&[F::or(F::eq("x", 1), F::and(F::eq("y", 2), F::eq("z", 3)))]);
    assert_eq!(
        q,
        doc! { "$or": [
            { "x": { "$eq": 1 } },
            { "$and": [ { "y": { "$eq": 2 } }, { "z": { "$eq": 3 } } ] },
        ] }
    );
}

#[test]
fn patterns_compile_to_anchored_regexes() {
    assert_eq!(translate(&[F::starts_with("n", "ab")]), doc! { "n": { "$regex": "^ab.*" } });
    assert_eq!(translate(&[F::ends_with("n", "yz")]), doc! { "n": { "$regex": ".*yz$" } });
    assert_eq!(translate(&[F::contains("n", "mid")]), doc! { "n": { "$regex": ".*mid.*" } });
}

#[test]
fn not_of_leaf_wraps_in_native_not() {
    assert_eq!(translate(&[F::not(F::eq("x", 1))]), doc! { "x": { "$not": { "$eq": 1 } } });
}

#[test]
fn double_negation_nests_without_collapsing() {
    let q = translate(&[F::not(F::not(F::eq("x", 1)))]);
    assert_eq!(q, doc! { "x": { "$not": { "$not": { "$eq": 1 } } } });
}

#[test]
fn not_of_and_degrades_instead_of_negating_compound() {
    let t = FilterTranslator::default()
        .translate_with_report(&[F::not(F::and(F::eq("x", 1), F::eq("y", 2)))])
        .unwrap();
    assert!(t.query.is_empty());
    assert_eq!(t.degradations.len(), 1);
    assert_eq!(t.degradations[0].reason, DegradeReason::CompoundUnderNegation);
}

#[test]
fn not_of_pattern_degrades() {
    let t = FilterTranslator::default()
        .translate_with_report(&[F::eq("a", 1), F::not(F::contains("n", "x"))])
        .unwrap();
    assert_eq!(t.query, doc! { "a": { "$eq": 1 } });
    assert_eq!(t.degradations[0].reason, DegradeReason::PatternUnderNegation);
    assert!(!t.is_exact());
}

#[test]
fn degraded_or_branch_widens_whole_disjunction() {
    let t = FilterTranslator::default()
        .translate_with_report(&[F::or(F::eq("a", 1), F::opaque("udf(a) > 3"))])
        .unwrap();
    assert!(t.query.is_empty());
    assert_eq!(t.degradations[0].reason, DegradeReason::Unsupported);
}

#[test]
fn degraded_and_branch_keeps_the_other_side() {
    let q = translate(&[F::and(F::eq("a", 1), F::opaque("udf(a)"))]);
    assert_eq!(q, doc! { "a": { "$eq": 1 } });
}

#[test]
fn scoped_translation_starts_inside_negation() {
    let t = FilterTranslator::default()
        .translate_scoped(&[F::or(F::eq("a", 1), F::eq("b", 2))], true)
        .unwrap();
    assert!(t.query.is_empty());
    assert_eq!(t.degradations.len(), 1);
}

#[test]
fn identifier_literal_is_coerced_when_enabled() {
    let hex = "507f191e810c19729de860ea";
    let oid = ObjectId::parse_str(hex).unwrap();
    let on = FilterTranslator::new(true);
    assert_eq!(on.translate(&[F::eq("_id", hex)]).unwrap(), doc! { "_id": { "$eq": oid } });
    assert_eq!(
        on.translate(&[F::is_in("_id", [hex])]).unwrap(),
        doc! { "_id": { "$in": [oid] } }
    );
    // Other attributes are left alone.
    assert_eq!(on.translate(&[F::eq("ref", hex)]).unwrap(), doc! { "ref": { "$eq": hex } });
}

#[test]
fn malformed_identifier_fails_translation() {
    let err = FilterTranslator::new(true).translate(&[F::eq("_id", "not-an-oid")]).unwrap_err();
    assert!(matches!(err, ScanError::IdentifierCoercion { ref attribute, .. } if attribute == "_id"));
    assert!(!err.is_retryable());
}

#[test]
fn coercion_off_passes_literals_through() {
    let q = FilterTranslator::new(false).translate(&[F::eq("_id", "not-an-oid")]).unwrap();
    assert_eq!(q, doc! { "_id": { "$eq": "not-an-oid" } });
}

#[test]
fn translator_follows_config_flag() {
    let mut cfg = ReadConfig::new("shop", "orders");
    assert!(FilterTranslator::from_config(&cfg).translate(&[F::eq("_id", "x")]).is_ok());
    cfg.id_as_object_id = true;
    assert!(FilterTranslator::from_config(&cfg).translate(&[F::eq("_id", "x")]).is_err());
}

#[test]
fn filter_json_form_translates_like_built_trees() {
    let json = r#"{"kind":"not","operand":{"kind":"compare","attribute":"x","op":"eq","value":"abc"}}"#;
    let f: F = serde_json::from_str(json).unwrap();
    assert_eq!(f, F::not(F::eq("x", "abc")));
    assert_eq!(translate(&[f]), doc! { "x": { "$not": { "$eq": "abc" } } });

    let tree = F::and(F::starts_with("name", "ab"), F::is_not_null("email"));
    let back: F = serde_json::from_str(&serde_json::to_string(&tree).unwrap()).unwrap();
    assert_eq!(back, tree);
}
