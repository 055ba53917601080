pub mod foundation_taskron;
