use super::types::SyscallContext;
use crate::abi::errno::Result;

pub fn clock_res_get(c: &mut SyscallContext) -> Result<()> {
    let clock_id = c.arg(0);
    c.result = crate::time::clock_res(clock_id)?;
    Ok(())
}

pub fn clock_time_get(c: &mut SyscallContext) -> Result<()> {
    let clock_id = c.arg(0);
    let precision = c.arg64(1);
    c.result = crate::time::clock_time(clock_id, precision)?;
    Ok(())
}
