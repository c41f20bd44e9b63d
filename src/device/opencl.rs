use std::collections::HashMap;
use std::sync::Mutex;

use ocl::core::Status;
use ocl::enums::{DeviceInfo, DeviceInfoResult, ProgramInfo, ProgramInfoResult};
use ocl::{flags, Buffer, Context, Device, Kernel, Platform, Program, Queue};

use super::{prev_power_of_two, ComputeDevice, REDUCTION_PROGRAM};
use crate::error::DeviceError;

const REDUCTION_SOURCE: &str = include_str!("../../kernels/reduction.cl");

fn backend_error(err: ocl::Error) -> DeviceError {
    DeviceError::Backend(err.to_string())
}

fn allocation_error(err: ocl::Error, requested: usize) -> DeviceError {
    match err.api_status() {
        Some(Status::CL_INVALID_BUFFER_SIZE)
        | Some(Status::CL_MEM_OBJECT_ALLOCATION_FAILURE)
        | Some(Status::CL_OUT_OF_RESOURCES)
        | Some(Status::CL_OUT_OF_HOST_MEMORY) => DeviceError::OutOfMemory { requested },
        _ => backend_error(err),
    }
}

#[derive(Clone)]
pub struct OclKernel {
    program: Program,
    name: String,
}

/// Device scratch buffer plus the buffer work-groups write their partial sums to,
/// so no group overwrites input another group has yet to read.
pub struct OclBuffer {
    data: Buffer<f32>,
    partials: Buffer<f32>,
}

pub struct OclDevice {
    device: Device,
    context: Context,
    queue: Queue,
    max_memory_bytes: u64,
    max_alloc_bytes: u64,
    max_work_group_size: usize,
    wave_size: usize,
    programs: Mutex<HashMap<String, Program>>,
}

impl OclDevice {
    /// Opens the first device of the default platform.
    pub fn new(wave_size: usize) -> Result<Self, DeviceError> {
        let platform = Platform::default();
        let device = Device::first(platform).map_err(backend_error)?;
        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(backend_error)?;
        let queue = Queue::new(&context, device, None).map_err(backend_error)?;

        let max_memory_bytes = match device.info(DeviceInfo::GlobalMemSize).map_err(backend_error)? {
            DeviceInfoResult::GlobalMemSize(bytes) => bytes,
            other => return Err(DeviceError::Backend(format!("unexpected device info {:?}", other))),
        };
        let max_alloc_bytes = match device.info(DeviceInfo::MaxMemAllocSize).map_err(backend_error)? {
            DeviceInfoResult::MaxMemAllocSize(bytes) => bytes,
            other => return Err(DeviceError::Backend(format!("unexpected device info {:?}", other))),
        };
        let max_work_group_size = prev_power_of_two(device.max_wg_size().map_err(backend_error)?);
        let wave_size = prev_power_of_two(wave_size.max(1)).min(max_work_group_size);

        log::info!(
            "OpenCL device {}: {} MB global memory, max work-group size {}, wave size {}",
            device.name().unwrap_or_default(),
            max_memory_bytes / 1024 / 1024,
            max_work_group_size,
            wave_size
        );

        Ok(Self {
            device,
            context,
            queue,
            max_memory_bytes,
            max_alloc_bytes,
            max_work_group_size,
            wave_size,
            programs: Mutex::new(HashMap::new()),
        })
    }

    fn program(&self, program: &str) -> Result<Program, DeviceError> {
        let mut programs = self
            .programs
            .lock()
            .map_err(|_| DeviceError::Backend("program cache poisoned".to_string()))?;
        if let Some(built) = programs.get(program) {
            return Ok(built.clone());
        }

        let source = match program {
            REDUCTION_PROGRAM => REDUCTION_SOURCE,
            _ => {
                return Err(DeviceError::KernelNotFound {
                    program: program.to_string(),
                    entry_point: String::new(),
                })
            }
        };
        let built = Program::builder()
            .devices(self.device)
            .src(source)
            .build(&self.context)
            .map_err(backend_error)?;
        log::debug!("compiled OpenCL program {}", program);
        programs.insert(program.to_string(), built.clone());
        Ok(built)
    }
}

impl ComputeDevice for OclDevice {
    type Buffer = OclBuffer;
    type Kernel = OclKernel;

    fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    fn wave_size(&self) -> usize {
        self.wave_size
    }

    fn work_group_size(&self, global_size: usize) -> usize {
        prev_power_of_two(global_size.min(self.max_work_group_size).max(1))
    }

    fn kernel(&self, program: &str, entry_point: &str) -> Result<OclKernel, DeviceError> {
        let built = self.program(program)?;
        let names = match built.info(ProgramInfo::KernelNames).map_err(backend_error)? {
            ProgramInfoResult::KernelNames(names) => names,
            other => return Err(DeviceError::Backend(format!("unexpected program info {:?}", other))),
        };
        if !names.split(';').any(|name| name == entry_point) {
            return Err(DeviceError::KernelNotFound {
                program: program.to_string(),
                entry_point: entry_point.to_string(),
            });
        }

        Ok(OclKernel {
            program: built,
            name: entry_point.to_string(),
        })
    }

    fn allocate(&self, len: usize) -> Result<OclBuffer, DeviceError> {
        let limit = (self.max_alloc_bytes / std::mem::size_of::<f32>() as u64) as usize;
        if len > limit {
            return Err(DeviceError::InvalidBufferSize { requested: len, limit });
        }

        let data = Buffer::<f32>::builder()
            .queue(self.queue.clone())
            .flags(flags::MEM_READ_WRITE)
            .len(len)
            .build()
            .map_err(|err| allocation_error(err, len))?;
        let partials = Buffer::<f32>::builder()
            .queue(self.queue.clone())
            .flags(flags::MEM_READ_WRITE)
            .len((len / self.wave_size).max(1))
            .build()
            .map_err(|err| allocation_error(err, len))?;
        Ok(OclBuffer { data, partials })
    }

    fn write(&self, buffer: &mut OclBuffer, offset: usize, data: &[f32]) -> Result<(), DeviceError> {
        buffer.data.write(data).offset(offset).enq().map_err(backend_error)
    }

    fn read(&self, buffer: &OclBuffer, offset: usize, out: &mut [f32]) -> Result<(), DeviceError> {
        buffer.data.read(out).offset(offset).enq().map_err(backend_error)
    }

    fn dispatch(
        &self,
        kernel: &OclKernel,
        buffer: &mut OclBuffer,
        global_size: usize,
        local_size: usize,
    ) -> Result<(), DeviceError> {
        let groups = global_size / local_size;
        let compute = |err: ocl::Error| DeviceError::Compute(err.to_string());

        let sum = Kernel::builder()
            .program(&kernel.program)
            .name(kernel.name.as_str())
            .queue(self.queue.clone())
            .global_work_size(global_size)
            .local_work_size(local_size)
            .arg(&buffer.data)
            .arg(&buffer.partials)
            .arg_local::<f32>(local_size)
            .build()
            .map_err(compute)?;
        unsafe {
            sum.enq().map_err(compute)?;
        }
        buffer
            .partials
            .copy(&buffer.data, Some(0), Some(groups))
            .enq()
            .map_err(compute)?;
        self.queue.finish().map_err(compute)
    }

    fn finish(&self) -> Result<(), DeviceError> {
        self.queue.finish().map_err(|err| DeviceError::Compute(err.to_string()))
    }
}
