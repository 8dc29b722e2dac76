pub mod notification_repo;
pub mod referral_repo;
pub mod reward_repo;
pub mod subscription_repo;
