//! Typed id aliases for every persisted record.

pub use super::id::Id;

// ============================================================================
// Marker types
// ============================================================================

pub struct User;
pub struct Organization;
pub struct Election;
pub struct ElectionLocation;
pub struct ElectionLocationQuestion;
pub struct Vote;
pub struct VoteCircle;
pub struct Proposal;
pub struct Support;
pub struct Category;
pub struct Post;
pub struct ImpulsaEdition;
pub struct ImpulsaEditionCategory;
pub struct ImpulsaProject;
pub struct ImpulsaProjectStateTransition;
pub struct Microcredit;
pub struct MicrocreditOption;
pub struct MicrocreditLoan;
pub struct BrandSetting;
pub struct Report;
pub struct ReportGroup;
pub struct EngineActivation;
pub struct UserStats;
pub struct Badge;
pub struct Point;
pub struct SpamFilter;

// ============================================================================
// Aliases
// ============================================================================

pub type UserId = Id<User>;
pub type OrganizationId = Id<Organization>;
pub type ElectionId = Id<Election>;
pub type ElectionLocationId = Id<ElectionLocation>;
pub type ElectionLocationQuestionId = Id<ElectionLocationQuestion>;
pub type VoteId = Id<Vote>;
pub type VoteCircleId = Id<VoteCircle>;
pub type ProposalId = Id<Proposal>;
pub type SupportId = Id<Support>;
pub type CategoryId = Id<Category>;
pub type PostId = Id<Post>;
pub type ImpulsaEditionId = Id<ImpulsaEdition>;
pub type ImpulsaEditionCategoryId = Id<ImpulsaEditionCategory>;
pub type ImpulsaProjectId = Id<ImpulsaProject>;
pub type ImpulsaProjectStateTransitionId = Id<ImpulsaProjectStateTransition>;
pub type MicrocreditId = Id<Microcredit>;
pub type MicrocreditOptionId = Id<MicrocreditOption>;
pub type MicrocreditLoanId = Id<MicrocreditLoan>;
pub type BrandSettingId = Id<BrandSetting>;
pub type ReportId = Id<Report>;
pub type ReportGroupId = Id<ReportGroup>;
pub type EngineActivationId = Id<EngineActivation>;
pub type UserStatsId = Id<UserStats>;
pub type BadgeId = Id<Badge>;
pub type PointId = Id<Point>;
pub type SpamFilterId = Id<SpamFilter>;
