//! End-to-end scenarios spanning the VM, the processor chain, and the
//! controller session wire protocol.

use gcodekit4::{Autolevel, GcodeSource, GcodeVM, MoveSplitter, ProcessorChainBuilder, VecSource};
use gcodekit4_core::{GcodeLine, Units};
use gcodekit4_parser::{SurfaceMap, SurfacePoint};

const AXES: [char; 3] = ['x', 'y', 'z'];

fn run_lines(lines: &[&str]) -> GcodeVM {
    let mut vm = GcodeVM::new(AXES.to_vec());
    for (n, text) in lines.iter().enumerate() {
        let line = GcodeLine::parse(n as u32 + 1, text).unwrap();
        vm.run(&line);
    }
    vm
}

#[test]
fn simple_program_tracks_position_units_and_bounds() {
    let vm = run_lines(&["G21", "G0 X10 Y0", "G1 X10 Y10 F100", "M2"]);

    assert_eq!(vm.state.pos, vec![10.0, 10.0, 0.0]);
    assert_eq!(vm.state.units, Units::Mm);
    assert!(vm.state.total_time > 0.0);
    assert_eq!(vm.state.bounds[0], (Some(0.0), Some(10.0)));
    assert_eq!(vm.state.bounds[1], (Some(0.0), Some(10.0)));
    assert_eq!(vm.state.bounds[2], (None, None));
}

#[test]
fn g92_offset_applies_and_clears() {
    let mut vm = GcodeVM::new(AXES.to_vec());
    for (n, text) in ["G90", "G0 X0 Y0 Z5", "G92 X1"].iter().enumerate() {
        vm.run(&GcodeLine::parse(n as u32 + 1, text).unwrap());
    }
    assert!(vm.state.offset_enabled);
    assert_eq!(vm.state.offset[0], 1.0);

    vm.run(&GcodeLine::parse(4, "G0 X5").unwrap());
    assert_eq!(vm.state.pos[0], 5.0);
    assert_eq!(vm.state.mpos[0], 4.0);

    vm.run(&GcodeLine::parse(5, "G92.1").unwrap());
    assert!(!vm.state.offset_enabled);
    assert_eq!(vm.state.pos[0], 4.0);
}

#[test]
fn line_counter_increases_by_one_per_line() {
    let vm = run_lines(&["G21", "G0 X1", "G1 X2 F10"]);
    assert_eq!(vm.state.line_counter, 3);
}

#[test]
fn move_splitter_breaks_long_moves_into_bounded_segments() {
    let source = VecSource::new(vec!["G1 X10".to_string()]);
    let mut chain = ProcessorChainBuilder::new()
        .add(Box::new(MoveSplitter::new(2.0)))
        .build(&source)
        .unwrap();

    let mut xs = Vec::new();
    for line in source.lines().unwrap() {
        for out in chain.process_line(line.unwrap()).unwrap() {
            if let Some(x) = out.get('x') {
                xs.push(x);
            }
        }
    }
    for out in chain.flush().unwrap() {
        if let Some(x) = out.get('x') {
            xs.push(x);
        }
    }

    assert_eq!(xs, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
}

#[test]
fn autolevel_predicts_plane_z_on_known_plane() {
    let map = SurfaceMap::from_points(
        vec![
            SurfacePoint { x: 0.0, y: 0.0, z: 0.0 },
            SurfacePoint { x: 10.0, y: 0.0, z: 1.0 },
            SurfacePoint { x: 0.0, y: 10.0, z: -1.0 },
        ],
        5.0,
    );
    let predicted = map.predict_z(5.0, 5.0).unwrap();
    assert!((predicted - 0.0).abs() < 1e-9);

    let source = VecSource::new(vec!["G1 X5 Y5 Z0 F100".to_string()]);
    let mut chain = ProcessorChainBuilder::new()
        .add(Box::new(Autolevel::new(map)))
        .build(&source)
        .unwrap();

    let mut emitted_z = None;
    for line in source.lines().unwrap() {
        for out in chain.process_line(line.unwrap()).unwrap() {
            if out.has('x') && out.has('y') {
                emitted_z = out.get('z');
            }
        }
    }
    assert_eq!(emitted_z, Some(0.0));
}

#[test]
fn gcode_line_round_trips_through_display() {
    for text in ["G1 X10 Y5.5 F100", "G0 X0", "M3 S1000"] {
        let line = GcodeLine::parse(1, text).unwrap();
        assert_eq!(line.to_string(), text);
    }
}

#[test]
fn sync_machine_to_state_replays_to_an_equal_state_on_included_fields() {
    let mut vm = GcodeVM::new(AXES.to_vec());
    for (n, text) in ["G21", "G1 X3 Y4 F250", "M3 S1000", "M8"].iter().enumerate() {
        vm.run(&GcodeLine::parse(n as u32 + 1, text).unwrap());
    }

    let sync_lines = vm.sync_machine_to_state(None, None);

    let mut replay = GcodeVM::new(AXES.to_vec());
    for (n, line) in sync_lines.iter().enumerate() {
        replay.run(&GcodeLine::parse(n as u32 + 1, &line.to_string()).unwrap());
    }

    assert_eq!(replay.state.motion_mode, vm.state.motion_mode);
    assert_eq!(replay.state.feed, vm.state.feed);
    assert_eq!(replay.state.units, vm.state.units);
    assert_eq!(replay.state.spindle, vm.state.spindle);
    assert_eq!(replay.state.spindle_direction, vm.state.spindle_direction);
    assert_eq!(replay.state.coolant, vm.state.coolant);
}
