//! 記録されるパスの列をGPU無しで検証する。
//!
//! 各パスが読み書きするバッファを表にして、書き込みの後に
//! 対応するbarrierを挟まずに読み書きしている箇所が無いことを確かめる。

use ashcompute::AccessFlags;
use std::collections::HashMap;
use wavefront::{
    record_render, BufferBarrier, BufferRole, Dispatch, PassEncoder, RenderPlan, Stage, Transfer,
};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    ResetTimestamps,
    WriteTimestamp(u32),
    Copy(Transfer),
    Barrier(Vec<BufferBarrier>),
    Dispatch(Dispatch),
    CopyTimestamps,
}

#[derive(Default)]
struct Recorder {
    commands: Vec<Command>,
}
impl PassEncoder for Recorder {
    fn reset_timestamps(&mut self) -> anyhow::Result<()> {
        self.commands.push(Command::ResetTimestamps);
        Ok(())
    }

    fn write_timestamp(&mut self, index: u32) -> anyhow::Result<()> {
        self.commands.push(Command::WriteTimestamp(index));
        Ok(())
    }

    fn copy(&mut self, transfer: Transfer) -> anyhow::Result<()> {
        self.commands.push(Command::Copy(transfer));
        Ok(())
    }

    fn barrier(&mut self, barriers: &[BufferBarrier]) -> anyhow::Result<()> {
        self.commands.push(Command::Barrier(barriers.to_vec()));
        Ok(())
    }

    fn dispatch(&mut self, dispatch: Dispatch) -> anyhow::Result<()> {
        self.commands.push(Command::Dispatch(dispatch));
        Ok(())
    }

    fn copy_timestamps(&mut self) -> anyhow::Result<()> {
        self.commands.push(Command::CopyTimestamps);
        Ok(())
    }
}

// パスごとのバッファへのアクセス
fn accesses(command: &Command) -> Vec<(BufferRole, AccessFlags, AccessFlags)> {
    let read = AccessFlags::SHADER_READ;
    let write = AccessFlags::SHADER_WRITE;
    let none = AccessFlags::empty();
    match command {
        Command::Dispatch(dispatch) => match dispatch.stage {
            Stage::RayGeneration => vec![
                (BufferRole::Output, read, write),
                (BufferRole::PathSegments, none, write),
            ],
            Stage::Extend => vec![
                (BufferRole::PathSegments, read, none),
                (BufferRole::Scene, read, none),
                (BufferRole::HitInfo, none, write),
            ],
            Stage::Shade => vec![
                (BufferRole::HitInfo, read, none),
                (BufferRole::PathSegments, read, write),
                (BufferRole::Output, read, write),
                (BufferRole::Scene, read, none),
            ],
        },
        Command::Copy(Transfer::UploadScene) => vec![
            (BufferRole::Staging, AccessFlags::TRANSFER_READ, none),
            (BufferRole::Scene, none, AccessFlags::TRANSFER_WRITE),
        ],
        Command::Copy(Transfer::ReadbackOutput) => vec![
            (BufferRole::Output, AccessFlags::TRANSFER_READ, none),
            (BufferRole::Staging, none, AccessFlags::TRANSFER_WRITE),
        ],
        _ => Vec::new(),
    }
}

#[derive(Default, Clone, Copy)]
struct RoleState {
    // barrierを挟んでいない書き込み
    unsynchronized_write: Option<AccessFlags>,
    // 最後の書き込みのうちbarrierで見えるようになったアクセス
    visible: AccessFlags,
    written: bool,
    // 最後のbarrier以降の読み込み
    unsynchronized_read: bool,
}

/// barrierの抜けを探す。見つかった場合は何番目のコマンドで何が起きたかを返す
fn find_hazards(commands: &[Command]) -> Vec<String> {
    let mut states: HashMap<BufferRole, RoleState> = HashMap::new();
    let mut hazards = Vec::new();

    for (index, command) in commands.iter().enumerate() {
        if let Command::Barrier(barriers) = command {
            // どのbarrierも実行順序は保証する
            for state in states.values_mut() {
                state.unsynchronized_read = false;
            }
            for barrier in barriers {
                let state = states.entry(barrier.buffer).or_default();
                match state.unsynchronized_write {
                    Some(write) if barrier.src_access.contains(write) => {
                        state.unsynchronized_write = None;
                        state.visible = barrier.dst_access;
                    }
                    Some(_) => {}
                    None => state.visible |= barrier.dst_access,
                }
            }
            continue;
        }

        let accesses = accesses(command);
        for (role, read, write) in &accesses {
            let state = states.entry(*role).or_default();
            if !read.is_empty() {
                if state.unsynchronized_write.is_some() {
                    hazards.push(format!("#{index} {command:?}: {role:?} read after write"));
                } else if state.written && !state.visible.contains(*read) {
                    hazards.push(format!("#{index} {command:?}: {role:?} write not visible"));
                }
            }
            if !write.is_empty() {
                if state.unsynchronized_write.is_some() {
                    hazards.push(format!("#{index} {command:?}: {role:?} write after write"));
                } else if state.unsynchronized_read {
                    hazards.push(format!("#{index} {command:?}: {role:?} write after read"));
                }
            }
        }
        for (role, read, write) in accesses {
            let state = states.entry(role).or_default();
            if !read.is_empty() {
                state.unsynchronized_read = true;
            }
            if !write.is_empty() {
                state.unsynchronized_write = Some(write);
                state.visible = AccessFlags::empty();
                state.written = true;
            }
        }
    }
    hazards
}

fn plan(total_rays: u64, pool_capacity: u32, bounces: u32) -> RenderPlan {
    RenderPlan {
        total_rays,
        pool_capacity,
        samples_per_pixel: 10,
        bounces,
        workgroup_width: 32,
        timestamps: true,
    }
}

fn record(plan: &RenderPlan) -> Vec<Command> {
    let mut recorder = Recorder::default();
    record_render(&mut recorder, plan).unwrap();
    recorder.commands
}

fn dispatches(commands: &[Command], stage: Stage) -> Vec<Dispatch> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Dispatch(dispatch) if dispatch.stage == stage => Some(*dispatch),
            _ => None,
        })
        .collect()
}

#[test]
fn recorded_passes_have_no_hazards() {
    for plan in [plan(100, 40, 4), plan(100, 100, 0), plan(1_000, 64, 2)] {
        let commands = record(&plan);
        assert_eq!(find_hazards(&commands), Vec::<String>::new(), "{plan:?}");
    }
}

#[test]
fn one_ray_generation_per_batch() {
    let commands = record(&plan(100, 40, 4));
    let ray_generation = dispatches(&commands, Stage::RayGeneration);
    assert_eq!(ray_generation.len(), 3);

    let push_constants = ray_generation
        .iter()
        .map(|dispatch| {
            let push_constants = dispatch.push_constants.unwrap();
            (
                push_constants.pixel_index_offset,
                push_constants.sample_index_offset,
                push_constants.pool_size,
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(push_constants, vec![(0, 0, 40), (4, 0, 40), (8, 0, 20)]);
    assert_eq!(
        ray_generation
            .iter()
            .map(|dispatch| dispatch.group_count)
            .collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
}

#[test]
fn extend_and_shade_repeat_bounces_plus_one_times() {
    let commands = record(&plan(100, 40, 4));
    let extend = dispatches(&commands, Stage::Extend);
    let shade = dispatches(&commands, Stage::Shade);
    assert_eq!(extend.len(), 3 * 5);
    assert_eq!(shade.len(), 3 * 5);
    assert!(extend
        .iter()
        .chain(&shade)
        .all(|dispatch| dispatch.group_count == 2 && dispatch.push_constants.is_none()));
}

#[test]
fn timestamps_bracket_the_whole_render() {
    let commands = record(&plan(100, 40, 1));
    assert_eq!(commands[0], Command::ResetTimestamps);
    assert_eq!(commands[1], Command::WriteTimestamp(0));
    assert_eq!(commands[2], Command::Copy(Transfer::UploadScene));
    let tail = &commands[commands.len() - 3..];
    assert_eq!(
        tail,
        &[
            Command::Copy(Transfer::ReadbackOutput),
            Command::WriteTimestamp(1),
            Command::CopyTimestamps,
        ]
    );

    let without = record(&RenderPlan {
        timestamps: false,
        ..plan(100, 40, 1)
    });
    assert!(!without.iter().any(|command| matches!(
        command,
        Command::ResetTimestamps | Command::WriteTimestamp(_) | Command::CopyTimestamps
    )));
}

#[test]
fn missing_barrier_between_batches_is_detected() {
    let commands = record(&plan(100, 40, 1));
    let first_ray_generation = commands
        .iter()
        .position(|command| matches!(command, Command::Dispatch(d) if d.stage == Stage::RayGeneration))
        .unwrap();
    // 2つ目のバッチの前のbarrierを取り除く
    let mut seen = 0;
    let stripped = commands
        .iter()
        .enumerate()
        .filter(|(index, command)| {
            let next_is_ray_generation = matches!(
                commands.get(index + 1),
                Some(Command::Dispatch(d)) if d.stage == Stage::RayGeneration
            );
            if matches!(command, Command::Barrier(_))
                && next_is_ray_generation
                && *index > first_ray_generation
            {
                seen += 1;
                return false;
            }
            true
        })
        .map(|(_, command)| command.clone())
        .collect::<Vec<_>>();
    assert_eq!(seen, 2);
    assert!(!find_hazards(&stripped).is_empty());
}

#[test]
fn wrong_access_in_barrier_is_detected() {
    let commands = record(&plan(40, 40, 0))
        .into_iter()
        .map(|command| match command {
            // readbackの前のbarrierをshader readにする
            Command::Barrier(barriers)
                if barriers
                    .iter()
                    .any(|b| b.dst_access == AccessFlags::TRANSFER_READ) =>
            {
                Command::Barrier(
                    barriers
                        .into_iter()
                        .map(|b| BufferBarrier {
                            dst_access: AccessFlags::SHADER_READ,
                            ..b
                        })
                        .collect(),
                )
            }
            command => command,
        })
        .collect::<Vec<_>>();
    let hazards = find_hazards(&commands);
    assert_eq!(hazards.len(), 1);
    assert!(hazards[0].contains("Output write not visible"));
}

#[test]
fn missing_upload_barrier_is_detected() {
    let commands = record(&plan(40, 40, 0))
        .into_iter()
        .filter(|command| {
            !matches!(command, Command::Barrier(barriers)
                if barriers.iter().any(|b| b.buffer == BufferRole::Scene))
        })
        .collect::<Vec<_>>();
    let hazards = find_hazards(&commands);
    assert!(hazards.iter().any(|hazard| hazard.contains("Scene read after write")));
}
