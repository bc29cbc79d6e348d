//! End-to-end integration tests for the doxa knowledge base.
//!
//! These tests exercise the full pipeline from text ingestion through
//! forward propagation, backward-chaining inference and belief maintenance,
//! validating that the parser, store, evaluator and BMS work together.

use doxa::atom::{Assertion, Comparator, Membership};
use doxa::bms::RecordSource;
use doxa::repr::{Answer, Representation};

fn memb(parent: &str, term: &str, val: f32) -> Assertion {
    Assertion::Memb(Membership::new(parent, term, Comparator::Equal, val).unwrap())
}

#[test]
fn grounded_fact_round_trip() {
    let kb = Representation::new();
    kb.tell("professor[$Lucy,u=1]").unwrap();
    assert_eq!(kb.ask("professor[$Lucy,u=1]").unwrap(), Answer::True);
}

#[test]
fn rule_then_fact_forward_propagates() {
    let kb = Representation::new();
    kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();
    kb.tell("professor[$Lucy,u=1]").unwrap();

    assert_eq!(kb.ask("person[$Lucy,u=1]").unwrap(), Answer::True);
    // The derived atom exists in the store without any further ask.
    assert_eq!(kb.test_pred(&memb("person", "$Lucy", 1.0)), Some(true));
}

#[test]
fn free_variable_query_returns_all_members() {
    let kb = Representation::new();
    kb.tell("animal[cow,u=1]").unwrap();
    kb.tell("animal[chicken,u=1]").unwrap();

    let results = kb.ask_all(":vars: x: (animal[x,u=1])").unwrap();
    assert_eq!(results["cow"]["animal"], Some(true));
    assert_eq!(results["chicken"]["animal"], Some(true));
}

#[test]
fn relation_value_mismatch_is_false() {
    let kb = Representation::new();
    kb.tell("<friend[$John,u=1;$Lucy]>").unwrap();
    assert_eq!(kb.ask("<friend[$Lucy,u=0;$John]>").unwrap(), Answer::False);
}

#[test]
fn contradictory_assertions_keep_latest_and_flag() {
    let kb = Representation::new();
    kb.tell("cold[$Water,u=0.9]").unwrap();
    kb.tell("cold[$Water,u=0.1]").unwrap();

    // Exactly one atom per (subject, category): the later value wins.
    assert_eq!(kb.ask("cold[$Water,u=0.1]").unwrap(), Answer::True);
    assert_eq!(kb.ask("cold[$Water,u=0.9]").unwrap(), Answer::False);

    // Direct user assertions overwrite without error but the contradiction
    // is recorded.
    let incs = kb.bms().inconsistencies();
    assert_eq!(incs.len(), 1);
    assert!(incs[0].antecedents.is_empty());
}

#[test]
fn contradiction_against_rule_derivation_names_antecedents() {
    let kb = Representation::new();
    kb.tell(":vars: x: (heated[x,u=1] |> cold[x,u=0])").unwrap();
    kb.tell("heated[$Water,u=1]").unwrap();
    assert_eq!(kb.ask("cold[$Water,u=0]").unwrap(), Answer::True);

    kb.tell("cold[$Water,u=0.9]").unwrap();
    let incs = kb.bms().inconsistencies();
    assert_eq!(incs.len(), 1);
    // The contradicted belief came from the rule; its antecedent is named.
    assert_eq!(incs[0].antecedents, vec!["heated[$Water,u=1]".to_string()]);
}

#[test]
fn conjunction_rule_completes_when_second_antecedent_arrives() {
    let kb = Representation::new();
    kb.tell(":vars: x: (bird[x,u=1] && hasWings[x,u=1] |> flies[x,u=1])")
        .unwrap();
    kb.tell("bird[$Tweety,u=1]").unwrap();
    assert_eq!(kb.ask("flies[$Tweety,u=1]").unwrap(), Answer::Unknown);

    kb.tell("hasWings[$Tweety,u=1]").unwrap();
    assert_eq!(kb.test_pred(&memb("flies", "$Tweety", 1.0)), Some(true));
    assert_eq!(kb.ask("flies[$Tweety,u=1]").unwrap(), Answer::True);
}

#[test]
fn multi_variable_rule_resolves_at_ask_time() {
    let kb = Representation::new();
    kb.tell(":vars: x, y: (<friend[x,u=1;y]> && crazy[x,u=1] |> crazy[y,u=1])")
        .unwrap();
    kb.tell("<friend[$John,u=1;$Lucy]>").unwrap();
    kb.tell("crazy[$John,u=1]").unwrap();

    assert_eq!(kb.ask("crazy[$Lucy,u=1]").unwrap(), Answer::True);
}

#[test]
fn ask_is_idempotent_on_unchanged_store() {
    let kb = Representation::new();
    kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();
    kb.tell("professor[$Lucy,u=1]").unwrap();

    let first = kb.ask("person[$Lucy,u=1]").unwrap();
    let second = kb.ask("person[$Lucy,u=1]").unwrap();
    assert_eq!(first, second);

    let unknown_first = kb.ask("immortal[$Lucy,u=1]").unwrap();
    let unknown_second = kb.ask("immortal[$Lucy,u=1]").unwrap();
    assert_eq!(unknown_first, Answer::Unknown);
    assert_eq!(unknown_first, unknown_second);
}

#[test]
fn positive_answers_verify_by_direct_lookup() {
    let kb = Representation::new();
    kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();
    kb.tell(":vars: x: (person[x,u=1] |> mortal[x,u=1])").unwrap();
    kb.tell("professor[$Lucy,u=1]").unwrap();

    for (name, val) in [("professor", 1.0), ("person", 1.0), ("mortal", 1.0)] {
        assert_eq!(
            kb.ask(&format!("{name}[$Lucy,u={val}]")).unwrap(),
            Answer::True
        );
        assert_eq!(kb.test_pred(&memb(name, "$Lucy", val)), Some(true));
    }
}

#[test]
fn bms_prev_keys_always_resolve() {
    let kb = Representation::new();
    kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();
    kb.tell(":vars: x: (person[x,u=1] |> mortal[x,u=1])").unwrap();
    kb.tell("professor[$Lucy,u=1]").unwrap();

    for key in [
        "professor[$Lucy,u=1]",
        "person[$Lucy,u=1]",
        "mortal[$Lucy,u=1]",
    ] {
        let record = kb.bms().get(key).unwrap();
        if let Some(prev) = record.prev {
            for antecedent in prev {
                assert!(kb.bms().contains(&antecedent), "dangling prev {antecedent}");
            }
        }
    }

    let direct = kb.bms().get("professor[$Lucy,u=1]").unwrap();
    assert!(matches!(direct.form, RecordSource::SelfAssert));
    let derived = kb.bms().get("mortal[$Lucy,u=1]").unwrap();
    assert!(matches!(derived.form, RecordSource::Rule { .. }));
}

#[test]
fn mixed_batch_single_tell() {
    let kb = Representation::new();
    kb.tell(
        "animal[cow,u=1]\n\
         animal[chicken,u=1]\n\
         <eats[grass,u=1;cow]>\n\
         :vars: x: (animal[x,u=1] |> living[x,u=1])",
    )
    .unwrap();

    assert_eq!(kb.ask("living[cow,u=1]").unwrap(), Answer::True);
    assert_eq!(kb.ask("living[chicken,u=1]").unwrap(), Answer::True);
    assert_eq!(kb.ask("<eats[grass,u=1;cow]>").unwrap(), Answer::True);
}

#[test]
fn fuzzy_comparator_queries() {
    let kb = Representation::new();
    kb.tell("cold[$Water,u=0.7]").unwrap();

    assert_eq!(kb.ask("cold[$Water,u>0.5]").unwrap(), Answer::True);
    assert_eq!(kb.ask("cold[$Water,u<0.5]").unwrap(), Answer::False);
    assert_eq!(kb.ask("cold[$Water,u<0.9]").unwrap(), Answer::True);
}

#[test]
fn empty_tell_is_an_error() {
    let kb = Representation::new();
    assert!(kb.tell("").is_err());
    assert!(kb.ask("").is_err());
}

#[test]
fn out_of_range_value_is_fatal_at_ingestion() {
    let kb = Representation::new();
    assert!(kb.tell("professor[$Lucy,u=2]").is_err());
    assert!(kb.tell("<friend[$John,u=-0.5;$Lucy]>").is_err());
}

#[test]
fn time_comparison_gates_a_rule() {
    let kb = Representation::new();
    // The death predates the query instant, so the rule fires.
    kb.tell(":vars: x, t1:time, t2:time=now: (dead[x,u=1,*t=t1] && timeCalc[t1<t2] |> gone[x,u=1])")
        .unwrap();
    kb.tell("dead[$Caesar,u=1,*t=1999.3.5]").unwrap();

    assert_eq!(kb.ask("gone[$Caesar,u=1]").unwrap(), Answer::True);
}

#[test]
fn concurrent_tell_and_ask() {
    use std::sync::Arc;

    let kb = Arc::new(Representation::new());
    kb.tell(":vars: x: (professor[x,u=1] |> person[x,u=1])").unwrap();

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let kb = Arc::clone(&kb);
            std::thread::spawn(move || {
                for j in 0..25 {
                    kb.tell(&format!("professor[$p{i}_{j},u=1]")).unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let kb = Arc::clone(&kb);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    // Answers are tri-valued, never an error, while the
                    // store changes under the query.
                    kb.ask("person[$p0_0,u=1]").unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    // Every told fact propagated through the rule exactly once.
    for i in 0..4 {
        for j in 0..25 {
            assert_eq!(
                kb.ask(&format!("person[$p{i}_{j},u=1]")).unwrap(),
                Answer::True
            );
        }
    }
}

#[test]
fn relation_update_keeps_single_atom_per_args() {
    let kb = Representation::new();
    kb.tell("<friend[$John,u=1;$Lucy]>").unwrap();
    kb.tell("<friend[$John,u=0.4;$Lucy]>").unwrap();

    assert_eq!(kb.ask("<friend[$John,u=0.4;$Lucy]>").unwrap(), Answer::True);
    assert_eq!(kb.ask("<friend[$John,u=1;$Lucy]>").unwrap(), Answer::False);
}

#[test]
fn class_membership_chains_through_rules() {
    let kb = Representation::new();
    kb.tell("animal[cow,u=1]").unwrap();
    kb.tell(":vars: x: (animal[x,u=1] |> living[x,u=1])").unwrap();

    // Classes participate in rules the same way individuals do.
    assert_eq!(kb.ask("living[cow,u=1]").unwrap(), Answer::True);
}
