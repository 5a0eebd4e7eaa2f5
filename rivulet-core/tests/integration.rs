//! Integration Tests for Reactive System
//!
//! These tests verify that signals, memos, effects, event gates and sessions
//! work together correctly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use rivulet_core::reactive::{DirtyState, Effect, EventGate, GateOptions, Memo, Runtime, Signal};
use rivulet_core::{Artifact, ReactiveError, ReferenceData, Session, Stimulus, Table, Value};

fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
    let count = Arc::new(AtomicI32::new(0));
    (count.clone(), count)
}

/// Test that memos cache values correctly.
#[test]
fn memo_caches_expensive_computation() {
    let runtime = Runtime::new();
    let (compute_count, compute_clone) = counter();

    let memo = Memo::new(&runtime, move || {
        compute_clone.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    });

    // First access computes
    assert_eq!(memo.get(), Ok(42));
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);

    // Subsequent accesses use cache
    assert_eq!(memo.get(), Ok(42));
    assert_eq!(memo.get(), Ok(42));
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);
}

/// A -> B -> C: changing A recomputes B then C, once each.
#[test]
fn chain_recomputes_in_order_once() {
    let runtime = Runtime::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = Signal::new(&runtime, 1);
    let b = {
        let (a, order) = (a.clone(), order.clone());
        Memo::new(&runtime, move || {
            order.lock().push("B");
            Ok(a.get() + 1)
        })
    };
    let c = {
        let (b, order) = (b.clone(), order.clone());
        Memo::new(&runtime, move || {
            order.lock().push("C");
            Ok(b.get()? * 10)
        })
    };

    assert_eq!(c.get(), Ok(20));
    order.lock().clear();

    a.set(2).unwrap();
    assert_eq!(b.state(), DirtyState::Dirty);
    assert_eq!(c.state(), DirtyState::MaybeDirty);

    assert_eq!(c.get(), Ok(30));
    assert_eq!(*order.lock(), vec!["B", "C"]);

    assert_eq!(c.get(), Ok(30));
    assert_eq!(order.lock().len(), 2);
}

/// A memo that reads X only while Y is true stops reacting to X.
#[test]
fn conditional_dependencies_adapt() {
    let runtime = Runtime::new();
    let x = Signal::new(&runtime, 10);
    let y = Signal::new(&runtime, true);

    let memo = {
        let (x, y) = (x.clone(), y.clone());
        Memo::new(&runtime, move || Ok(if y.get() { x.get() } else { -1 }))
    };

    assert_eq!(memo.get(), Ok(10));
    assert_eq!(memo.dependency_count(), 2);

    y.set(false).unwrap();
    assert_eq!(memo.get(), Ok(-1));
    assert_eq!(memo.dependency_count(), 1);

    let runs = memo.run_count();
    x.set(11).unwrap();
    x.set(12).unwrap();
    assert_eq!(memo.state(), DirtyState::Clean);
    assert_eq!(memo.get(), Ok(-1));
    assert_eq!(memo.run_count(), runs);
}

/// A gate waiting for its trigger ignores every other change.
#[test]
fn event_gate_suppresses_until_trigger() {
    let runtime = Runtime::new();
    let apply = Signal::new(&runtime, 0u32);
    let year = Signal::new(&runtime, 2000);
    let continent = Signal::new(&runtime, "Asia".to_string());
    let (runs, runs_clone) = counter();

    let gate = {
        let (year, continent) = (year.clone(), continent.clone());
        EventGate::new(
            &runtime,
            &apply,
            GateOptions {
                ignore_initial: true,
                ignore_none: false,
            },
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{} {}", continent.get(), year.get()))
            },
        )
    };

    for y in 2001..2010 {
        year.set(y).unwrap();
    }
    continent.set("Europe".to_string()).unwrap();
    assert_eq!(gate.get(), Ok(None));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    apply.set(1).unwrap();
    assert_eq!(gate.get(), Ok(Some("Europe 2009".to_string())));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Two memos reading each other fail instead of looping; the rest of the
/// graph is untouched.
#[test]
fn memo_cycle_is_rejected() {
    let runtime = Runtime::new();
    let base = Signal::new(&runtime, 3);
    let healthy = {
        let base = base.clone();
        Memo::new(&runtime, move || Ok(base.get() * 2))
    };
    assert_eq!(healthy.get(), Ok(6));

    let slot: Arc<OnceLock<Memo<i32>>> = Arc::new(OnceLock::new());
    let a = {
        let slot = slot.clone();
        Memo::new(&runtime, move || match slot.get() {
            Some(b) => Ok(b.get()? + 1),
            None => Ok(0),
        })
    };
    let b = {
        let a = a.clone();
        Memo::new(&runtime, move || Ok(a.get()? + 1))
    };
    slot.set(b.clone()).unwrap();

    assert!(matches!(
        a.get(),
        Err(ReactiveError::CyclicDependency { .. })
    ));

    base.set(4).unwrap();
    assert_eq!(healthy.get(), Ok(8));
}

/// Effects writing each other's inputs: the second registration is refused.
#[test]
fn effect_cycle_is_rejected() {
    let runtime = Runtime::new();
    let x = Signal::new(&runtime, 1);
    let y = Signal::new(&runtime, 0);

    let first = {
        let (x, y) = (x.clone(), y.clone());
        Effect::new(&runtime, move || {
            y.set(x.get() + 1)?;
            Ok(())
        })
        .unwrap()
    };
    let nodes = runtime.node_count();

    let second = {
        let (x, y) = (x.clone(), y.clone());
        Effect::new(&runtime, move || {
            x.set(y.get() + 1)?;
            Ok(())
        })
    };
    assert!(matches!(
        second,
        Err(ReactiveError::CyclicDependency { .. })
    ));
    assert_eq!(runtime.node_count(), nodes);

    x.set(5).unwrap();
    assert_eq!(y.get(), 6);
    assert_eq!(first.run_count(), 2);
}

/// Sessions never see each other's changes.
#[test]
fn sessions_are_isolated() {
    let (s1, s2) = (Runtime::new(), Runtime::new());
    let build = |runtime: &Runtime| {
        let input = Signal::new(runtime, 1);
        let source = input.clone();
        let memo = Memo::new(runtime, move || Ok(source.get() + 100));
        (input, memo)
    };
    let (in1, memo1) = build(&s1);
    let (_in2, memo2) = build(&s2);

    assert_eq!(memo1.get(), Ok(101));
    assert_eq!(memo2.get(), Ok(101));

    in1.set(7).unwrap();
    assert_eq!(memo1.state(), DirtyState::Dirty);
    assert_eq!(memo2.state(), DirtyState::Clean);
    assert_eq!(memo2.cached(), Some(101));
    assert_eq!(memo2.run_count(), 1);
}

/// price * qty: one recompute per transition.
#[test]
fn price_times_quantity() {
    let runtime = Runtime::new();
    let price = Signal::new(&runtime, 100);
    let qty = Signal::new(&runtime, 2);
    let (runs, runs_clone) = counter();

    let total = {
        let (price, qty) = (price.clone(), qty.clone());
        Memo::new(&runtime, move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(price.get() * qty.get())
        })
    };

    assert_eq!(total.get(), Ok(200));
    qty.set(3).unwrap();
    assert_eq!(total.get(), Ok(300));
    assert_eq!(total.get(), Ok(300));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A failing memo does not disturb an unrelated sibling on the same stimulus.
#[test]
fn errors_stay_local() {
    let session = Session::new(Default::default(), Arc::new(ReferenceData::empty()));
    let numerator = session.input("numerator", 10);
    let divisor = session.input("divisor", 2);
    let label = session.input("label", "ok");

    let ratio = Memo::new(session.runtime(), move || {
        let d = divisor.get().as_i64()?;
        if d == 0 {
            return Err("division by zero".into());
        }
        Ok(numerator.get().as_i64()? / d)
    });
    let (sibling_runs, sibling_clone) = counter();
    let sibling = Memo::new(session.runtime(), move || {
        sibling_clone.fetch_add(1, Ordering::SeqCst);
        Ok(label.get().as_str()?.to_uppercase())
    });

    assert_eq!(ratio.get(), Ok(5));
    assert_eq!(sibling.get(), Ok("OK".to_string()));

    session
        .dispatch(&Stimulus::new().set("divisor", 0))
        .unwrap();

    assert!(matches!(ratio.get(), Err(ReactiveError::Recompute { .. })));
    assert_eq!(sibling.get(), Ok("OK".to_string()));
    assert_eq!(sibling_runs.load(Ordering::SeqCst), 1);
}

/// An effect producing a value runs before the effect consuming it, and the
/// consumer runs once per change.
#[test]
fn producer_effects_run_before_consumers() {
    let runtime = Runtime::new();
    let celsius = Signal::new(&runtime, 0);
    let fahrenheit = Signal::new(&runtime, 0);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let consumer = {
        let (c, f, seen) = (celsius.clone(), fahrenheit.clone(), seen.clone());
        Effect::new(&runtime, move || {
            seen.lock().push((c.get(), f.get()));
            Ok(())
        })
        .unwrap()
    };
    let _producer = {
        let (c, f) = (celsius.clone(), fahrenheit.clone());
        Effect::new(&runtime, move || {
            f.set(c.get() * 9 / 5 + 32)?;
            Ok(())
        })
        .unwrap()
    };
    assert_eq!(consumer.run_count(), 2);

    celsius.set(10).unwrap();
    assert_eq!(consumer.run_count(), 3);
    assert_eq!(seen.lock().last(), Some(&(10, 50)));
}

/// All writes of a batch land before the single effect run.
#[test]
fn batch_runs_effects_once() {
    let runtime = Runtime::new();
    let price = Signal::new(&runtime, 1);
    let qty = Signal::new(&runtime, 1);
    let totals = Arc::new(Mutex::new(Vec::new()));

    let _effect = {
        let (p, q, totals) = (price.clone(), qty.clone(), totals.clone());
        Effect::new(&runtime, move || {
            totals.lock().push(p.get() * q.get());
            Ok(())
        })
        .unwrap()
    };

    let ((), failures) = runtime.batch(|| {
        price.set(10).unwrap();
        qty.set(3).unwrap();
    });
    assert!(failures.is_empty());
    assert_eq!(*totals.lock(), vec![1, 30]);
}

/// The EV dashboard: filters only apply when the user clicks Apply.
#[test]
fn apply_button_dashboard() {
    let data = Table::from_json(
        r#"[
            {"make": "TESLA", "county": "King", "range": 308},
            {"make": "TESLA", "county": "Pierce", "range": 220},
            {"make": "NISSAN", "county": "King", "range": 150},
            {"make": "KIA", "county": "King", "range": 239}
        ]"#,
    )
    .unwrap();
    let shared = Arc::new(ReferenceData::empty().with_table("ev", data));
    let session = Session::new(Default::default(), shared);

    let make = session.input("make", "TESLA");
    let apply = session.input("apply", 0);
    let table = session.shared().table("ev").unwrap();

    let filtered = EventGate::new(
        session.runtime(),
        &apply,
        GateOptions::default(),
        move || Ok(table.filter_eq("make", &make.get())?),
    );
    let all = session.shared().table("ev").unwrap();
    session
        .output("vehicles", move || {
            let rows = filtered.get()?.map_or(all.len(), |t| t.len());
            Ok(Artifact::text(rows.to_string()))
        })
        .unwrap();

    assert_eq!(session.render("vehicles"), Ok(Artifact::text("4")));

    let report = session
        .dispatch(&Stimulus::new().set("make", "NISSAN"))
        .unwrap();
    assert_eq!(report.changed_inputs, vec!["make"]);
    assert!(report.stale_outputs.is_empty());
    assert_eq!(session.render("vehicles"), Ok(Artifact::text("4")));

    let report = session.dispatch(&Stimulus::new().set("apply", 1)).unwrap();
    assert_eq!(report.stale_outputs, vec!["vehicles"]);
    assert_eq!(session.render("vehicles"), Ok(Artifact::text("1")));
}

/// A prediction effect that fails reports the failure and keeps working.
#[test]
fn prediction_effect_reports_failures() {
    let session = Session::new(Default::default(), Arc::new(ReferenceData::empty()));
    let predict = session.input("predict", 0);
    let flipper_length = session.input("flipper_length", 190.0);
    let prediction: Signal<Option<f64>> = Signal::new(session.runtime(), None);

    let effect = {
        let prediction = prediction.clone();
        Effect::on_event(
            session.runtime(),
            &predict,
            GateOptions::on_change(),
            move || {
                let length = flipper_length.get().as_f64()?;
                if length <= 0.0 {
                    return Err("flipper length must be positive".into());
                }
                prediction.set(Some(length * 50.0 - 5780.0))?;
                Ok(())
            },
        )
        .unwrap()
    };
    assert_eq!(prediction.get(), None);

    let report = session
        .dispatch(&Stimulus::new().set("flipper_length", -1.0).set("predict", 1))
        .unwrap();
    assert_eq!(report.effect_failures.len(), 1);
    assert_eq!(report.effect_failures[0].effect, effect.id());
    assert!(effect.last_error().is_some());
    assert_eq!(prediction.get(), None);

    let report = session
        .dispatch(&Stimulus::new().set("flipper_length", 200.0).set("predict", 2))
        .unwrap();
    assert!(report.effect_failures.is_empty());
    assert_eq!(prediction.get(), Some(4220.0));
    assert_eq!(
        session.input_signal("flipper_length").unwrap().get(),
        Value::Float(200.0)
    );
}
