//! Property-based tests over arbitrary event sequences.

use std::sync::Arc;

use proptest::prelude::*;

use machina::{
    ActionError, EventCtx, Handled, Machine, MachineDef, MachineDefBuilder, StateBehavior,
    Transition,
};

#[derive(Clone)]
struct Stopped;
impl StateBehavior<u32> for Stopped {}

#[derive(Clone)]
struct Playing;
impl StateBehavior<u32> for Playing {}

#[derive(Clone)]
struct Paused;
impl StateBehavior<u32> for Paused {}

#[derive(Clone, Debug)]
struct Play;
#[derive(Clone, Debug)]
struct Stop;
#[derive(Clone, Debug)]
struct Pause;
#[derive(Clone, Debug)]
struct Noise;

#[derive(Clone, Debug)]
enum Input {
    Play,
    Stop,
    Pause,
    Noise,
}

fn inputs() -> impl Strategy<Value = Vec<Input>> {
    prop::collection::vec(
        prop_oneof![
            Just(Input::Play),
            Just(Input::Stop),
            Just(Input::Pause),
            Just(Input::Noise),
        ],
        0..64,
    )
}

fn count_action(ctx: &mut EventCtx<'_, u32>) -> Result<(), ActionError> {
    *ctx.context_mut() += 1;
    Ok(())
}

/// Player machine whose every transition action bumps the context counter.
fn player_def() -> Arc<MachineDef<u32>> {
    let mut builder = MachineDefBuilder::<u32>::new("player");
    let stopped = builder.state(|| Stopped);
    let playing = builder.state(|| Playing);
    let paused = builder.state(|| Paused);
    builder.initial(stopped);
    builder
        .transition(Transition::<u32, Play>::external(stopped, playing).action(|ctx, _| count_action(ctx)));
    builder
        .transition(Transition::<u32, Pause>::external(playing, paused).action(|ctx, _| count_action(ctx)));
    builder
        .transition(Transition::<u32, Play>::external(paused, playing).action(|ctx, _| count_action(ctx)));
    builder
        .transition(Transition::<u32, Stop>::external(playing, stopped).action(|ctx, _| count_action(ctx)));
    builder
        .transition(Transition::<u32, Stop>::external(paused, stopped).action(|ctx, _| count_action(ctx)));
    Arc::new(builder.build().unwrap())
}

/// Same shape, but every row's guard rejects.
fn locked_def() -> Arc<MachineDef<u32>> {
    let mut builder = MachineDefBuilder::<u32>::new("locked");
    let stopped = builder.state(|| Stopped);
    let playing = builder.state(|| Playing);
    builder.initial(stopped);
    builder.transition(Transition::<u32, Play>::external(stopped, playing).guard(|_, _| false));
    builder.transition(Transition::<u32, Stop>::internal(stopped).guard(|_, _| false));
    builder.transition(Transition::<u32, Pause>::internal(stopped).guard(|_, _| false));
    Arc::new(builder.build().unwrap())
}

fn drive(machine: &mut Machine<u32>, input: &Input) -> Handled {
    match input {
        Input::Play => machine.process_event(Play).unwrap(),
        Input::Stop => machine.process_event(Stop).unwrap(),
        Input::Pause => machine.process_event(Pause).unwrap(),
        Input::Noise => machine.process_event(Noise).unwrap(),
    }
}

proptest! {
    #[test]
    fn configuration_stays_valid(sequence in inputs()) {
        let def = player_def();
        let state_count = def.state_count();
        let mut machine = Machine::new(def, 0u32);
        machine.start().unwrap();

        for input in &sequence {
            drive(&mut machine, input);
            let active = machine.get_active_state_ids();
            prop_assert_eq!(active.len(), 1);
            prop_assert!((active[0].raw() as usize) < state_count);
        }
    }

    #[test]
    fn handled_count_matches_actions_taken(sequence in inputs()) {
        let mut machine = Machine::new(player_def(), 0u32);
        machine.start().unwrap();

        let mut handled = 0u32;
        for input in &sequence {
            if drive(&mut machine, input) == Handled::True {
                handled += 1;
            }
        }
        prop_assert_eq!(*machine.context(), handled);
    }

    #[test]
    fn fully_guarded_machine_never_moves(sequence in inputs()) {
        let mut machine = Machine::new(locked_def(), 0u32);
        machine.start().unwrap();
        let initial = machine.get_active_state_ids().to_vec();

        for input in &sequence {
            let handled = drive(&mut machine, input);
            prop_assert!(matches!(handled, Handled::GuardReject | Handled::False));
            prop_assert_eq!(machine.get_active_state_ids(), &initial[..]);
        }
    }

    #[test]
    fn manual_enqueue_conserves_events(sequence in inputs()) {
        let mut machine = Machine::new(player_def(), 0u32);
        machine.start().unwrap();

        for input in &sequence {
            match input {
                Input::Play => machine.enqueue_event(Play),
                Input::Stop => machine.enqueue_event(Stop),
                Input::Pause => machine.enqueue_event(Pause),
                Input::Noise => machine.enqueue_event(Noise),
            }
        }
        prop_assert_eq!(machine.queued_len(), sequence.len());

        machine.process_queued_events().unwrap();
        prop_assert_eq!(machine.queued_len(), 0);
    }
}
