// Hot-reload behavior under concurrent rendering: rapid edits must never
// tear the render-visible object and must end on the final edit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use snexc::backend::ExtArg;
use snexc::object::CompileState;
use snexc::reload::{PolyVoiceSet, RecompileController};
use snexc::session::{compile, source_digest};

fn edit(k: i64) -> String {
    format!("int main(int x){{ return x + {k}; }}")
}

#[test]
fn rapid_edits_end_on_the_final_edit() {
    const EDITS: i64 = 20;

    let controller = Arc::new(RecompileController::new());
    let stop = Arc::new(AtomicBool::new(false));

    // render loop: every 5ms, call whatever object is installed
    let render = {
        let controller = Arc::clone(&controller);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut observed = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                if let Some(obj) = controller.current() {
                    // a torn object would fail to bind or compute garbage
                    let main = obj.entry("main").expect("installed object lost its entry");
                    let mut inst = obj.new_instance();
                    let out = main.call(&mut inst, &mut [ExtArg::Int(1)]).as_i64();
                    assert!(
                        (1..=1 + EDITS).contains(&out),
                        "render saw impossible output {out}"
                    );
                    observed.push(out);
                }
                thread::sleep(Duration::from_millis(5));
            }
            observed
        })
    };

    for k in 0..=EDITS {
        controller.set_source(edit(k));
        controller.recompile_now();
        thread::sleep(Duration::from_millis(2));
    }

    stop.store(true, Ordering::Relaxed);
    let observed = render.join().expect("render thread panicked");

    assert_eq!(controller.state(), CompileState::Ready);
    let obj = controller.current().unwrap();
    assert_eq!(obj.provenance, source_digest(&edit(EDITS)));
    let main = obj.entry("main").unwrap();
    let mut inst = obj.new_instance();
    assert_eq!(main.call(&mut inst, &mut [ExtArg::Int(1)]).as_i64(), 1 + EDITS);

    // the loop ran long enough to see at least one object
    assert!(!observed.is_empty());
}

#[test]
fn edits_submitted_during_a_drain_are_not_dropped() {
    let controller = Arc::new(RecompileController::new());
    // drive recompiles from a second thread while edits keep landing
    let worker = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            for _ in 0..50 {
                controller.recompile_now();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    for k in 0..10 {
        controller.set_source(edit(k));
        thread::sleep(Duration::from_millis(2));
    }
    worker.join().unwrap();

    // a final drain picks up anything still pending
    controller.recompile_now();
    assert_eq!(
        controller.current().unwrap().provenance,
        source_digest(&edit(9))
    );
}

#[test]
fn failed_edit_leaves_the_render_object_in_service() {
    let controller = RecompileController::new();
    controller.set_source(edit(3));
    controller.recompile_now();
    let good = controller.current().unwrap();

    controller.set_source("int main( {");
    controller.recompile_now();

    assert_eq!(controller.state(), CompileState::Ready);
    assert!(Arc::ptr_eq(&good, &controller.current().unwrap()));
    assert!(controller.take_error().is_some());
}

#[test]
fn voice_groups_swap_wholesale() {
    let set = PolyVoiceSet::new(8);
    let a = Arc::new(compile(&edit(1)).unwrap());
    set.install(Arc::clone(&a));
    let g1 = set.group().unwrap();
    assert_eq!(g1.num_voices(), 8);

    // every voice in a group runs the same program generation
    let main = g1.object.entry("main").unwrap();
    for v in 0..g1.num_voices() {
        let mut inst = g1.voice(v).lock();
        assert_eq!(main.call(&mut inst, &mut [ExtArg::Int(1)]).as_i64(), 2);
    }

    let b = Arc::new(compile(&edit(5)).unwrap());
    set.install(b);
    let g2 = set.group().unwrap();
    assert!(!Arc::ptr_eq(&g1, &g2));
    let main = g2.object.entry("main").unwrap();
    let mut inst = g2.voice(0).lock();
    assert_eq!(main.call(&mut inst, &mut [ExtArg::Int(1)]).as_i64(), 6);
}
