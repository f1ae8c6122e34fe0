pub mod imu_heading;
pub mod kalman_cv;
