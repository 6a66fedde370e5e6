use bugview_core::{
    parse_filter_document, write_filter_document, Matcher, RecordBuilder, RecordRef, Sortable,
    SortableValue,
};

fn findings() -> Vec<RecordRef> {
    vec![
        RecordBuilder::new(1)
            .category("SECURITY")
            .bug_code("SQL")
            .pattern("SQL_INJECTION")
            .class_name("com.example.Dao")
            .priority(1)
            .rank(4)
            .build(),
        RecordBuilder::new(2)
            .category("CORRECTNESS")
            .bug_code("NP")
            .pattern("NP_NULL_ON_SOME_PATH")
            .class_name("com.example.Service")
            .priority(2)
            .rank(12)
            .build(),
        RecordBuilder::new(3)
            .category("STYLE")
            .bug_code("SF")
            .pattern("SF_SWITCH_NO_DEFAULT")
            .class_name("com.other.Util")
            .priority(3)
            .rank(18)
            .build(),
    ]
}

#[test]
fn parsed_filters_hide_what_they_describe() {
    let document = parse_filter_document(
        r#"<FindBugsFilter>
             <Match>
               <Bug category="SECURITY"/>
               <Rank value="10"/>
             </Match>
           </FindBugsFilter>"#,
    )
    .expect("document should parse");
    let filters = document.into_filter_set();

    let records = findings();
    let visible: Vec<u64> =
        records.iter().filter(|r| filters.matches(r)).map(|r| r.id).collect();
    // Only the high-rank security finding is suppressed.
    assert_eq!(visible, [2, 3]);
}

#[test]
fn serialization_survives_a_full_round_trip() {
    let document = parse_filter_document(
        r#"<SuppressionFilter>
             <StackedFilter>
               <FilterAtom key="category" value="SECURITY"/>
               <FilterAtom key="priority" value="1"/>
             </StackedFilter>
             <Or>
               <Class name="~com\.other\..*"/>
               <Priority value="3" disabled="true"/>
             </Or>
             <Not>
               <Package name="com.example"/>
             </Not>
           </SuppressionFilter>"#,
    )
    .expect("document should parse");

    let serialized = write_filter_document(document.kind, &document.matchers);
    let reparsed = parse_filter_document(&serialized).expect("round trip should parse");
    assert_eq!(document.kind, reparsed.kind);
    assert_eq!(document.matchers, reparsed.matchers);
}

#[test]
fn stacked_filters_compare_as_sets_across_the_boundary() {
    let from_tree = Matcher::stacked(vec![
        SortableValue::new(Sortable::Priority, "1"),
        SortableValue::new(Sortable::Category, "SECURITY"),
    ]);
    let from_disk = parse_filter_document(
        r#"<FindBugsFilter>
             <StackedFilter>
               <FilterAtom key="category" value="SECURITY"/>
               <FilterAtom key="priority" value="1"/>
             </StackedFilter>
           </FindBugsFilter>"#,
    )
    .expect("document should parse");

    let mut filters = from_disk.into_filter_set();
    // The freshly built tree-side filter is recognized as a duplicate of
    // the persisted one despite the different atom order.
    assert!(!filters.add(from_tree));
    assert_eq!(filters.len(), 1);
}

#[test]
fn disabled_filters_round_trip_without_filtering() {
    let document = parse_filter_document(
        r#"<FindBugsFilter>
             <Bug category="SECURITY" disabled="true"/>
           </FindBugsFilter>"#,
    )
    .expect("document should parse");
    let filters = document.into_filter_set();

    let records = findings();
    assert!(records.iter().all(|r| filters.matches(r)));
}
